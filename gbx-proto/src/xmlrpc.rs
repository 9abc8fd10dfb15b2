//! XML-RPC envelopes carried inside GBXRemote frames.
//!
//! Only the subset the server actually speaks is handled: `methodCall`,
//! `methodResponse` with a single param, and faults. Values decode to
//! [`Value`]; `base64` and `dateTime.iso8601` are kept as their raw text.

use crate::{ProtocolError, Result, Value};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

/// Deepest `<value>` nesting accepted in a response
pub const MAX_VALUE_DEPTH: usize = 32;

/// Application-level error reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

/// A decoded `methodResponse`
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    /// First returned param, `None` for an empty `<params/>`
    Success(Option<Value>),
    Fault(Fault),
}

impl MethodResponse {
    /// Turns a fault into [`ProtocolError::Fault`]
    pub fn into_result(self) -> Result<Option<Value>> {
        match self {
            MethodResponse::Success(value) => Ok(value),
            MethodResponse::Fault(Fault { code, message }) => {
                Err(ProtocolError::Fault { code, message })
            }
        }
    }
}

/// Serializes a `methodCall` envelope
pub fn encode_call(method: &str, args: &[Value]) -> Vec<u8> {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<methodCall>");
    xml.push_str(&format!("<methodName>{}</methodName><params>", escape(method)));
    for arg in args {
        xml.push_str("<param>");
        write_value(&mut xml, arg);
        xml.push_str("</param>");
    }
    xml.push_str("</params></methodCall>\n");
    xml.into_bytes()
}

/// Serializes a successful `methodResponse` carrying one value
pub fn encode_response(value: &Value) -> Vec<u8> {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    write_value(&mut xml, value);
    xml.push_str("</param></params></methodResponse>\n");
    xml.into_bytes()
}

/// Serializes a fault `methodResponse`
pub fn encode_fault(fault: &Fault) -> Vec<u8> {
    let body: Value = [
        ("faultCode", Value::Int(fault.code)),
        ("faultString", Value::String(fault.message.clone())),
    ]
    .into_iter()
    .collect();

    let mut xml = String::from("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    write_value(&mut xml, &body);
    xml.push_str("</fault></methodResponse>\n");
    xml.into_bytes()
}

fn write_value(xml: &mut String, value: &Value) {
    xml.push_str("<value>");
    match value {
        Value::String(s) => {
            xml.push_str(&format!("<string>{}</string>", escape(s.as_str())));
        }
        Value::Int(i) => {
            xml.push_str(&format!("<int>{}</int>", i));
        }
        Value::Bool(b) => {
            xml.push_str(&format!("<boolean>{}</boolean>", u8::from(*b)));
        }
        Value::Double(d) => {
            xml.push_str(&format!("<double>{}</double>", d));
        }
        Value::Array(items) => {
            xml.push_str("<array><data>");
            for item in items {
                write_value(xml, item);
            }
            xml.push_str("</data></array>");
        }
        Value::Struct(members) => {
            xml.push_str("<struct>");
            for (name, member) in members {
                xml.push_str(&format!("<member><name>{}</name>", escape(name.as_str())));
                write_value(xml, member);
                xml.push_str("</member>");
            }
            xml.push_str("</struct>");
        }
    }
    xml.push_str("</value>");
}

/// Parses a `methodResponse` envelope
pub fn decode_response(payload: &[u8]) -> Result<MethodResponse> {
    let xml = std::str::from_utf8(payload)
        .map_err(|e| ProtocolError::Decode(format!("envelope is not UTF-8: {}", e)))?;
    let mut parser = Parser::new(tokenize(xml)?);

    parser.open("methodResponse")?;
    let response = if parser.try_open("params") {
        let mut params = Vec::new();
        while !parser.try_close("params") {
            parser.open("param")?;
            parser.open("value")?;
            params.push(parser.value()?);
            parser.close("param")?;
        }
        MethodResponse::Success(params.into_iter().next())
    } else {
        parser.open("fault")?;
        parser.open("value")?;
        let body = parser.value()?;
        parser.close("fault")?;
        MethodResponse::Fault(fault_from(&body)?)
    };
    parser.close("methodResponse")?;
    parser.finish()?;

    Ok(response)
}

fn fault_from(body: &Value) -> Result<Fault> {
    let code = body
        .get("faultCode")
        .and_then(Value::as_i32)
        .ok_or_else(|| ProtocolError::Decode("fault without faultCode".to_string()))?;
    let message = body
        .get("faultString")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Fault { code, message })
}

#[derive(Debug, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Text(String),
}

fn tokenize(xml: &str) -> Result<Vec<Token>> {
    let mut reader = Reader::from_str(xml);
    let mut tokens = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => tokens.push(Token::Open(element_name(e.name().as_ref()))),
            Event::End(e) => tokens.push(Token::Close(element_name(e.name().as_ref()))),
            Event::Empty(e) => {
                let name = element_name(e.name().as_ref());
                tokens.push(Token::Open(name.clone()));
                tokens.push(Token::Close(name));
            }
            Event::Text(e) => tokens.push(Token::Text(e.unescape()?.into_owned())),
            Event::CData(e) => {
                tokens.push(Token::Text(String::from_utf8_lossy(&e.into_inner()).into_owned()))
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(tokens)
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, depth: 0 }
    }

    /// Skips whitespace between elements; never called inside a scalar
    fn skip_blank(&mut self) {
        while let Some(Token::Text(text)) = self.tokens.get(self.pos) {
            if !text.trim().is_empty() {
                break;
            }
            self.pos += 1;
        }
    }

    fn try_open(&mut self, name: &str) -> bool {
        self.skip_blank();
        match self.tokens.get(self.pos) {
            Some(Token::Open(n)) if n == name => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn try_close(&mut self, name: &str) -> bool {
        self.skip_blank();
        match self.tokens.get(self.pos) {
            Some(Token::Close(n)) if n == name => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn open(&mut self, name: &str) -> Result<()> {
        if self.try_open(name) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("<{}>", name)))
        }
    }

    fn close(&mut self, name: &str) -> Result<()> {
        if self.try_close(name) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("</{}>", name)))
        }
    }

    fn unexpected(&self, wanted: &str) -> ProtocolError {
        let found = match self.tokens.get(self.pos) {
            Some(Token::Open(n)) => format!("<{}>", n),
            Some(Token::Close(n)) => format!("</{}>", n),
            Some(Token::Text(t)) => format!("text {:?}", t),
            None => "end of envelope".to_string(),
        };
        ProtocolError::Decode(format!("expected {}, found {}", wanted, found))
    }

    /// Concatenates adjacent text tokens
    fn text(&mut self) -> String {
        let mut out = String::new();
        while let Some(Token::Text(text)) = self.tokens.get(self.pos) {
            out.push_str(text);
            self.pos += 1;
        }
        out
    }

    fn finish(&mut self) -> Result<()> {
        self.skip_blank();
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.unexpected("end of envelope"))
        }
    }

    /// Parses the body of a `<value>` whose open tag was consumed, through `</value>`
    fn value(&mut self) -> Result<Value> {
        if self.depth >= MAX_VALUE_DEPTH {
            return Err(ProtocolError::Decode("value nested too deeply".to_string()));
        }
        self.depth += 1;
        let value = self.value_body();
        self.depth -= 1;
        value
    }

    fn value_body(&mut self) -> Result<Value> {
        // An untyped value is a string, whitespace included
        let start = self.pos;
        let text = self.text();
        if matches!(self.tokens.get(self.pos), Some(Token::Close(n)) if n == "value") {
            self.pos += 1;
            return Ok(Value::String(text));
        }
        self.pos = start;
        self.skip_blank();

        let kind = match self.tokens.get(self.pos) {
            Some(Token::Open(n)) => n.clone(),
            _ => return Err(self.unexpected("a value type")),
        };
        self.pos += 1;

        let value = match kind.as_str() {
            "string" | "base64" | "dateTime.iso8601" => Value::String(self.text()),
            "int" | "i4" => {
                let raw = self.text();
                let int = raw
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::Decode(format!("bad int {:?}", raw)))?;
                Value::Int(int)
            }
            "boolean" => match self.text().trim() {
                "1" => Value::Bool(true),
                "0" => Value::Bool(false),
                other => return Err(ProtocolError::Decode(format!("bad boolean {:?}", other))),
            },
            "double" => {
                let raw = self.text();
                let double = raw
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::Decode(format!("bad double {:?}", raw)))?;
                Value::Double(double)
            }
            "struct" => {
                let mut members = BTreeMap::new();
                while self.try_open("member") {
                    self.open("name")?;
                    let name = self.text();
                    self.close("name")?;
                    self.open("value")?;
                    let member = self.value()?;
                    self.close("member")?;
                    members.insert(name, member);
                }
                Value::Struct(members)
            }
            "array" => {
                self.open("data")?;
                let mut items = Vec::new();
                while self.try_open("value") {
                    items.push(self.value()?);
                }
                self.close("data")?;
                Value::Array(items)
            }
            other => return Err(ProtocolError::Decode(format!("unsupported value type <{}>", other))),
        };

        self.close(&kind)?;
        self.close("value")?;
        Ok(value)
    }
}
