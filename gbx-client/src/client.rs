use crate::config::{GbxSettings, Timeouts};
use gbx_proto::{framing, xmlrpc, MethodResponse, ProtocolError, Result, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Handle counter seed; the first call on a connection uses the next value
pub const HANDLE_BASE: u32 = 0x8000_0001;

/// Frames read per call before giving up on a response
pub const MAX_FRAMES_PER_CALL: usize = 10;

/// One GBXRemote connection that has completed its handshake
///
/// A `Session` only exists in the ready state: [`Session::connect`] and
/// [`Session::handshake`] fail rather than hand out a half-open session, and
/// [`Session::close`] consumes it. Dropping a session, including dropping a
/// pending [`Session::issue`] future, releases the socket.
pub struct Session<S> {
    stream: S,
    banner: String,
    handle: u32,
    frames_received: usize,
    max_frame_size: u32,
    timeouts: Timeouts,
}

impl Session<TcpStream> {
    /// Connects to `addr` and reads the handshake banner
    pub async fn connect(addr: &str, timeouts: Timeouts) -> Result<Self> {
        debug!("Connecting to {}", addr);

        let stream = match timeout(timeouts.connect, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProtocolError::Connect(e)),
            Err(_) => return Err(ProtocolError::Timeout("connect")),
        };

        Self::handshake(stream, timeouts).await
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the length-prefixed banner the server sends on connect
    ///
    /// The banner content is not checked against a protocol signature.
    pub async fn handshake(mut stream: S, timeouts: Timeouts) -> Result<Self> {
        let max_frame_size = framing::DEFAULT_MAX_FRAME_SIZE;

        let banner = timeout(timeouts.read, framing::read_frame(&mut stream, max_frame_size))
            .await
            .map_err(|_| ProtocolError::Handshake("timed out waiting for banner".to_string()))?
            .map_err(|e| ProtocolError::Handshake(e.to_string()))?;
        let banner = String::from_utf8_lossy(&banner).into_owned();

        debug!("Received handshake banner: {}", banner);

        Ok(Self {
            stream,
            banner,
            handle: HANDLE_BASE,
            frames_received: 0,
            max_frame_size,
            timeouts,
        })
    }

    pub fn banner(&self) -> &str {
        &self.banner
    }

    /// Frames read from the server since the handshake
    pub fn frames_received(&self) -> usize {
        self.frames_received
    }

    /// Sends one call and waits for its response, skipping server callbacks
    ///
    /// Any frame whose handle is in the response range is taken as the
    /// answer; the handle is not compared with the one just sent. That is
    /// sound only while a session never has more than one call outstanding.
    pub async fn issue(&mut self, method: &str, args: &[Value]) -> Result<MethodResponse> {
        self.handle = self
            .handle
            .checked_add(1)
            .ok_or(ProtocolError::HandlesExhausted)?;
        let handle = self.handle;

        debug!("Calling {} (handle: {:#x})", method, handle);

        let payload = xmlrpc::encode_call(method, args);
        timeout(
            self.timeouts.write,
            framing::write_frame(&mut self.stream, handle, &payload),
        )
        .await
        .map_err(|_| ProtocolError::Timeout("write"))??;

        for _ in 0..MAX_FRAMES_PER_CALL {
            let frame = timeout(
                self.timeouts.read,
                framing::read_frame(&mut self.stream, self.max_frame_size),
            )
            .await
            .map_err(|_| ProtocolError::Timeout("read"))??;
            self.frames_received += 1;

            let (frame_handle, envelope) = framing::split_handle(&frame)?;
            if framing::is_response_handle(frame_handle) {
                if frame_handle != handle {
                    debug!("Response handle {:#x} differs from call {:#x}", frame_handle, handle);
                }
                return xmlrpc::decode_response(envelope);
            }

            debug!("Skipping callback frame (handle: {:#x})", frame_handle);
        }

        warn!("No response to {} within {} frames", method, MAX_FRAMES_PER_CALL);
        Err(ProtocolError::FrameBudgetExceeded(MAX_FRAMES_PER_CALL))
    }

    /// Shuts the connection down
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Issues single calls against a game server, one connection per call
#[derive(Clone)]
pub struct GbxClient {
    settings: GbxSettings,
    timeouts: Timeouts,
}

impl GbxClient {
    pub fn new(settings: GbxSettings, timeouts: Timeouts) -> Self {
        Self { settings, timeouts }
    }

    pub fn settings(&self) -> &GbxSettings {
        &self.settings
    }

    /// Connects, authenticates, makes one call and disconnects
    ///
    /// Every failure, whatever its cause, comes back as `None`.
    pub async fn call(&self, method: &str, args: &[Value]) -> Option<Value> {
        match self.try_call(method, args).await {
            Ok(value) => value,
            Err(e) => {
                debug!("{} unavailable: {}", method, e);
                None
            }
        }
    }

    /// Same as [`GbxClient::call`] but keeps the failure cause
    pub async fn try_call(&self, method: &str, args: &[Value]) -> Result<Option<Value>> {
        let mut session = Session::connect(&self.settings.addr(), self.timeouts).await?;

        let credentials = [
            Value::from(self.settings.user.as_str()),
            Value::from(self.settings.password.as_str()),
        ];
        session.issue("Authenticate", &credentials).await?.into_result()?;

        let result = session.issue(method, args).await?.into_result()?;

        if let Err(e) = session.close().await {
            debug!("Error closing session after {}: {}", method, e);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gbx_proto::Fault;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const CALLBACK_HANDLE: u32 = 0x0000_0001;

    fn banner_frame() -> Vec<u8> {
        let banner = b"GBXRemote 2";
        let mut frame = (banner.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(banner);
        frame
    }

    fn response_frame(handle: u32, value: &Value) -> Vec<u8> {
        framing::encode_frame(&xmlrpc::encode_response(value), handle).unwrap().to_vec()
    }

    fn fault_frame(handle: u32, fault: &Fault) -> Vec<u8> {
        framing::encode_frame(&xmlrpc::encode_fault(fault), handle).unwrap().to_vec()
    }

    fn callback_frame() -> Vec<u8> {
        let call = xmlrpc::encode_call(
            "TrackMania.PlayerChat",
            &[Value::Int(0), Value::from("server"), Value::from("hi")],
        );
        framing::encode_frame(&call, CALLBACK_HANDLE).unwrap().to_vec()
    }

    fn test_timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(1),
            read: Duration::from_millis(200),
            write: Duration::from_secs(1),
        }
    }

    fn map_info(uid: &str) -> Value {
        [("UId", Value::from(uid)), ("Name", Value::from("$f00A01"))]
            .into_iter()
            .collect()
    }

    async fn read_request(server: &mut DuplexStream) -> (u32, String) {
        let frame = framing::read_frame(server, framing::DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        let (handle, envelope) = framing::split_handle(&frame).unwrap();
        (handle, String::from_utf8(envelope.to_vec()).unwrap())
    }

    async fn ready_session(preloaded: Vec<Vec<u8>>) -> (Session<DuplexStream>, DuplexStream) {
        let (client, mut server) = tokio::io::duplex(256 * 1024);
        server.write_all(&banner_frame()).await.unwrap();
        for frame in preloaded {
            server.write_all(&frame).await.unwrap();
        }
        let session = Session::handshake(client, test_timeouts()).await.unwrap();
        (session, server)
    }

    type Reply = Box<dyn Fn(u32) -> Vec<Vec<u8>> + Send + Sync>;

    /// Serves one connection: sends the banner, then answers each request in turn
    async fn stub_server(replies: Vec<Reply>) -> (GbxClient, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&banner_frame()).await.unwrap();

            let mut requests = Vec::new();
            for reply in replies {
                let frame = match framing::read_frame(&mut stream, framing::DEFAULT_MAX_FRAME_SIZE).await {
                    Ok(frame) => frame,
                    Err(_) => break,
                };
                let (handle, envelope) = framing::split_handle(&frame).unwrap();
                requests.push(String::from_utf8(envelope.to_vec()).unwrap());
                for out in reply(handle) {
                    if stream.write_all(&out).await.is_err() {
                        return requests;
                    }
                }
            }
            requests
        });

        (client_for(addr.port()), task)
    }

    fn client_for(port: u16) -> GbxClient {
        let settings = GbxSettings {
            host: "127.0.0.1".to_string(),
            port,
            user: "SuperAdmin".to_string(),
            password: "tester123".to_string(),
        };
        GbxClient::new(settings, test_timeouts())
    }

    fn reply<F>(f: F) -> Reply
    where
        F: Fn(u32) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        Box::new(f)
    }

    fn ok_reply(value: Value) -> Reply {
        reply(move |handle| vec![response_frame(handle, &value)])
    }

    #[tokio::test]
    async fn test_handshake_keeps_banner() {
        let (session, _server) = ready_session(vec![]).await;
        assert_eq!(session.banner(), "GBXRemote 2");
        assert_eq!(session.frames_received(), 0);
    }

    #[tokio::test]
    async fn test_handles_increase_from_base() {
        let (mut session, mut server) = ready_session(vec![
            response_frame(0x8000_0002, &Value::Bool(true)),
            response_frame(0x8000_0003, &Value::Int(4)),
        ])
        .await;

        session.issue("Authenticate", &[]).await.unwrap();
        session.issue("GetStatus", &[]).await.unwrap();

        let (first, first_xml) = read_request(&mut server).await;
        let (second, second_xml) = read_request(&mut server).await;
        assert_eq!(first, 0x8000_0002);
        assert_eq!(second, 0x8000_0003);
        assert!(first_xml.contains("<methodName>Authenticate</methodName>"));
        assert!(second_xml.contains("<methodName>GetStatus</methodName>"));
    }

    #[tokio::test]
    async fn test_callbacks_skipped_before_response() {
        for n in 0..MAX_FRAMES_PER_CALL {
            let mut frames: Vec<Vec<u8>> = (0..n).map(|_| callback_frame()).collect();
            frames.push(response_frame(0x8000_0002, &map_info("A")));
            frames.push(response_frame(0x8000_0003, &Value::Int(1)));

            let (mut session, _server) = ready_session(frames).await;
            let response = session.issue("GetCurrentChallengeInfo", &[]).await.unwrap();

            assert_eq!(response, MethodResponse::Success(Some(map_info("A"))));
            assert_eq!(session.frames_received(), n + 1);
        }
    }

    #[tokio::test]
    async fn test_any_response_range_handle_accepted() {
        let (mut session, _server) =
            ready_session(vec![response_frame(0x8000_0777, &Value::Int(7))]).await;

        let response = session.issue("GetStatus", &[]).await.unwrap();
        assert_eq!(response, MethodResponse::Success(Some(Value::Int(7))));
    }

    #[tokio::test]
    async fn test_frame_budget_exhausted() {
        let mut frames: Vec<Vec<u8>> = (0..MAX_FRAMES_PER_CALL).map(|_| callback_frame()).collect();
        frames.push(response_frame(0x8000_0002, &Value::Int(1)));

        let (mut session, _server) = ready_session(frames).await;
        let result = session.issue("GetStatus", &[]).await;

        assert!(matches!(result, Err(ProtocolError::FrameBudgetExceeded(10))));
        assert_eq!(session.frames_received(), MAX_FRAMES_PER_CALL);
    }

    #[tokio::test]
    async fn test_short_banner_is_handshake_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(&20u32.to_le_bytes()).await.unwrap();
        server.write_all(b"GBX").await.unwrap();
        drop(server);

        let result = Session::handshake(client, test_timeouts()).await;
        assert!(matches!(result, Err(ProtocolError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_silent_server_times_out_on_response() {
        let (mut session, _server) = ready_session(vec![]).await;
        let result = session.issue("GetStatus", &[]).await;
        assert!(matches!(result, Err(ProtocolError::Timeout("read"))));
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (client, server) = stub_server(vec![
            ok_reply(Value::Bool(true)),
            ok_reply(map_info("Hx3kUAbQ9P8")),
        ])
        .await;

        let value = client.call("GetCurrentChallengeInfo", &[]).await;
        assert_eq!(value, Some(map_info("Hx3kUAbQ9P8")));

        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("<methodName>Authenticate</methodName>"));
        assert!(requests[0].contains("<string>SuperAdmin</string>"));
        assert!(requests[0].contains("<string>tester123</string>"));
        assert!(requests[1].contains("<methodName>GetCurrentChallengeInfo</methodName>"));
    }

    #[tokio::test]
    async fn test_call_skips_callbacks() {
        let (client, _server) = stub_server(vec![
            ok_reply(Value::Bool(true)),
            reply(|handle| {
                let mut frames: Vec<Vec<u8>> = (0..9).map(|_| callback_frame()).collect();
                frames.push(response_frame(handle, &Value::Int(90_000)));
                frames
            }),
        ])
        .await;

        assert_eq!(client.call("GetTimeAttackLimit", &[]).await, Some(Value::Int(90_000)));
    }

    #[tokio::test]
    async fn test_call_unavailable_after_ten_callbacks() {
        let (client, _server) = stub_server(vec![
            ok_reply(Value::Bool(true)),
            reply(|_| (0..MAX_FRAMES_PER_CALL).map(|_| callback_frame()).collect()),
        ])
        .await;

        let result = client.try_call("GetCurrentGameInfo", &[]).await;
        assert!(matches!(result, Err(ProtocolError::FrameBudgetExceeded(_))));
    }

    #[tokio::test]
    async fn test_auth_fault_makes_call_unavailable() {
        let (client, server) = stub_server(vec![reply(|handle| {
            vec![fault_frame(
                handle,
                &Fault { code: -1000, message: "Permission denied.".to_string() },
            )]
        })])
        .await;

        let result = client.try_call("GetCurrentGameInfo", &[]).await;
        assert!(matches!(result, Err(ProtocolError::Fault { code: -1000, .. })));

        // The requested call is never sent after a failed login
        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_banner_is_unavailable_within_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let client = client_for(port);
        let started = std::time::Instant::now();
        let value = client.call("GetCurrentGameInfo", &[]).await;

        assert_eq!(value, None);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client_for(port);
        let result = client.try_call("GetCurrentGameInfo", &[]).await;
        assert!(matches!(result, Err(ProtocolError::Connect(_))));
        assert_eq!(client.call("GetCurrentGameInfo", &[]).await, None);
    }
}
