//! The messaging envelope (spec §4.1): versioned JSON frames with typed
//! payloads and a status code/message, carried over the transport adapter.
//!
//! Grounded on `examples/original_source/inc/common/messaging/json_msg.hpp`:
//! a generic JSON object with a protocol version and message type plus
//! arbitrary named fields, `get_value<T>(name)` field access, and a
//! protocol-version check on parse. The Rust version replaces exceptions
//! with `Result` and replaces the generic-template field accessor with
//! serde's `Deserialize`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The protocol version this build understands. A peer whose `prot_ver`
/// exceeds this is rejected with [`ProtocolError::ProtocolMismatch`].
pub const PROTOCOL_VERSION: u32 = 1;

const PROT_VER_FIELD: &str = "prot_ver";
const MSG_TYPE_FIELD: &str = "msg_type";
const STAT_CODE_FIELD: &str = "stat_code";
const STAT_MSG_FIELD: &str = "stat_msg";

/// Wire message type codes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Undefined = 0,
    SuppLangRequest = 1,
    SuppLangResponse = 2,
    TransJobRequest = 3,
    TransJobResponse = 4,
    ProcRequest = 5,
    ProcResponse = 6,
}

impl MsgType {
    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => MsgType::Undefined,
            1 => MsgType::SuppLangRequest,
            2 => MsgType::SuppLangResponse,
            3 => MsgType::TransJobRequest,
            4 => MsgType::TransJobResponse,
            5 => MsgType::ProcRequest,
            6 => MsgType::ProcResponse,
            _ => return None,
        })
    }

    fn code(self) -> u32 {
        self as u32
    }
}

/// Response status codes (spec §3 Message envelope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatCode {
    Undefined = 0,
    Ok = 1,
    Partial = 2,
    Error = 3,
    Canceled = 4,
}

impl StatCode {
    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => StatCode::Undefined,
            1 => StatCode::Ok,
            2 => StatCode::Partial,
            3 => StatCode::Error,
            4 => StatCode::Canceled,
            _ => return None,
        })
    }

    fn code(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol version mismatch: peer sent {peer}, we support up to {ours}")]
    ProtocolMismatch { peer: u32, ours: u32 },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("missing mandatory field '{0}'")]
    MissingField(String),
}

/// A versioned JSON message envelope. Wraps a `serde_json::Value` object,
/// the way the original wraps an `nlohmann::json` object, instead of a
/// fixed Rust struct, so that any role can attach its own named fields.
#[derive(Debug, Clone)]
pub struct Envelope {
    obj: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    /// Starts a new outbound envelope of the given message type, stamped
    /// with [`PROTOCOL_VERSION`].
    pub fn build(msg_type: MsgType) -> Self {
        let mut obj = serde_json::Map::new();
        obj.insert(PROT_VER_FIELD.to_owned(), PROTOCOL_VERSION.into());
        obj.insert(MSG_TYPE_FIELD.to_owned(), msg_type.code().into());
        Self { obj }
    }

    /// Sets a named field to an arbitrary serializable value.
    pub fn set_field<T: Serialize>(&mut self, name: &str, value: T) {
        let json_value = serde_json::to_value(value).expect("value must serialize to JSON");
        self.obj.insert(name.to_owned(), json_value);
    }

    /// Sets the response status fields (spec §4.1 `set_status`).
    pub fn set_status(&mut self, code: StatCode, message: impl Into<String>) {
        self.obj
            .insert(STAT_CODE_FIELD.to_owned(), code.code().into());
        self.obj
            .insert(STAT_MSG_FIELD.to_owned(), message.into().into());
    }

    /// Serializes the envelope. Field ordering is not a contract.
    pub fn serialize(&self) -> Vec<u8> {
        serde_json::to_vec(&self.obj).expect("envelope must serialize")
    }

    /// Parses a wire frame. Fails with [`ProtocolError::MalformedFrame`] on
    /// invalid JSON or a non-object top level, [`ProtocolError::MissingField`]
    /// if `prot_ver` or `msg_type` are absent, and
    /// [`ProtocolError::ProtocolMismatch`] if the peer's version exceeds
    /// ours. No field defaults on read: absence is always an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| ProtocolError::MalformedFrame("top-level value is not an object".into()))?
            .clone();
        let envelope = Self { obj };
        envelope.verify_version()?;
        // msg_type must be present and a recognised code.
        let _ = envelope.msg_type()?;
        Ok(envelope)
    }

    /// Checks `prot_ver` against [`PROTOCOL_VERSION`]. Equal or lower is
    /// accepted; strictly greater is a [`ProtocolError::ProtocolMismatch`].
    pub fn verify_version(&self) -> Result<(), ProtocolError> {
        let peer: u32 = self.field(PROT_VER_FIELD)?;
        if peer > PROTOCOL_VERSION {
            return Err(ProtocolError::ProtocolMismatch {
                peer,
                ours: PROTOCOL_VERSION,
            });
        }
        Ok(())
    }

    pub fn msg_type(&self) -> Result<MsgType, ProtocolError> {
        let code: u32 = self.field(MSG_TYPE_FIELD)?;
        MsgType::from_code(code)
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("unknown msg_type code {code}")))
    }

    pub fn stat_code(&self) -> Result<StatCode, ProtocolError> {
        let code: u32 = self.field(STAT_CODE_FIELD)?;
        StatCode::from_code(code)
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("unknown stat_code {code}")))
    }

    pub fn stat_msg(&self) -> Result<String, ProtocolError> {
        self.field(STAT_MSG_FIELD)
    }

    /// Retrieves and deserializes a named field. Fails with
    /// [`ProtocolError::MissingField`] if absent.
    pub fn field<T: DeserializeOwned>(&self, name: &str) -> Result<T, ProtocolError> {
        let raw = self
            .obj
            .get(name)
            .ok_or_else(|| ProtocolError::MissingField(name.to_owned()))?;
        serde_json::from_value(raw.clone())
            .map_err(|e| ProtocolError::MalformedFrame(format!("field '{name}': {e}")))
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.obj == other.obj
    }
}

// ---------------------------------------------------------------------------
// Typed payloads (spec §6 wire protocol)
// ---------------------------------------------------------------------------

/// `supp_lang_request` carries no payload fields beyond the envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuppLangRequest {}

/// `supp_lang_response`: `source_language -> [target_language, ...]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuppLangResponse {
    pub langs: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationJobRequest {
    pub job_id: u64,
    pub source_lang: String,
    pub target_lang: String,
    pub trans_info: bool,
    pub source_sent: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSentData {
    pub trans_text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack_load: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationJobResponse {
    pub job_id: u64,
    pub target_data: Vec<TargetSentData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorRequest {
    pub job_token: String,
    pub chunk_idx: usize,
    pub num_chunks: usize,
    pub priority: i32,
    pub language: String,
    pub chunk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProcessorResponse {
    pub job_token: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chunk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chunk_idx: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_chunks: Option<usize>,
}

impl Envelope {
    /// Builds a `supp_lang_request` envelope.
    pub fn supp_lang_request() -> Self {
        Self::build(MsgType::SuppLangRequest)
    }

    /// Builds a `supp_lang_response` envelope from a typed payload.
    pub fn supp_lang_response(payload: &SuppLangResponse, code: StatCode, message: impl Into<String>) -> Self {
        let mut env = Self::build(MsgType::SuppLangResponse);
        env.set_status(code, message);
        env.set_field("langs", &payload.langs);
        env
    }

    pub fn trans_job_request(payload: &TranslationJobRequest) -> Self {
        let mut env = Self::build(MsgType::TransJobRequest);
        env.set_field("job_id", payload.job_id);
        env.set_field("source_lang", &payload.source_lang);
        env.set_field("target_lang", &payload.target_lang);
        env.set_field("trans_info", payload.trans_info);
        env.set_field("source_sent", &payload.source_sent);
        env
    }

    pub fn trans_job_request_payload(&self) -> Result<TranslationJobRequest, ProtocolError> {
        Ok(TranslationJobRequest {
            job_id: self.field("job_id")?,
            source_lang: self.field("source_lang")?,
            target_lang: self.field("target_lang")?,
            trans_info: self.field("trans_info")?,
            source_sent: self.field("source_sent")?,
        })
    }

    pub fn trans_job_response(
        payload: &TranslationJobResponse,
        code: StatCode,
        message: impl Into<String>,
    ) -> Self {
        let mut env = Self::build(MsgType::TransJobResponse);
        env.set_status(code, message);
        env.set_field("job_id", payload.job_id);
        env.set_field("target_data", &payload.target_data);
        env
    }

    pub fn trans_job_response_payload(&self) -> Result<TranslationJobResponse, ProtocolError> {
        Ok(TranslationJobResponse {
            job_id: self.field("job_id")?,
            target_data: self.field("target_data")?,
        })
    }

    pub fn proc_request(payload: &ProcessorRequest) -> Self {
        let mut env = Self::build(MsgType::ProcRequest);
        env.set_field("job_token", &payload.job_token);
        env.set_field("chunk_idx", payload.chunk_idx);
        env.set_field("num_chunks", payload.num_chunks);
        env.set_field("priority", payload.priority);
        env.set_field("language", &payload.language);
        env.set_field("chunk", &payload.chunk);
        env
    }

    pub fn proc_request_payload(&self) -> Result<ProcessorRequest, ProtocolError> {
        Ok(ProcessorRequest {
            job_token: self.field("job_token")?,
            chunk_idx: self.field("chunk_idx")?,
            num_chunks: self.field("num_chunks")?,
            priority: self.field("priority")?,
            language: self.field("language")?,
            chunk: self.field("chunk")?,
        })
    }

    pub fn proc_response(
        job_token: &str,
        code: StatCode,
        message: impl Into<String>,
        success: Option<ProcessorResponse>,
    ) -> Self {
        let mut env = Self::build(MsgType::ProcResponse);
        env.set_status(code, message);
        env.set_field("job_token", job_token);
        if let Some(success) = success {
            if let Some(language) = success.language {
                env.set_field("language", language);
            }
            if let Some(chunk) = success.chunk {
                env.set_field("chunk", chunk);
            }
            if let Some(chunk_idx) = success.chunk_idx {
                env.set_field("chunk_idx", chunk_idx);
            }
            if let Some(num_chunks) = success.num_chunks {
                env.set_field("num_chunks", num_chunks);
            }
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_stamps_protocol_version_and_msg_type() {
        let env = Envelope::build(MsgType::TransJobRequest);
        assert_eq!(env.field::<u32>("prot_ver").unwrap(), PROTOCOL_VERSION);
        assert_eq!(env.msg_type().unwrap(), MsgType::TransJobRequest);
    }

    #[test]
    fn parse_round_trips_a_well_formed_translation_job_request() {
        let payload = TranslationJobRequest {
            job_id: 7,
            source_lang: "en".into(),
            target_lang: "fr".into(),
            trans_info: false,
            source_sent: vec!["Hello.".into(), "World.".into()],
        };
        let env = Envelope::trans_job_request(&payload);
        let bytes = env.serialize();
        let parsed = Envelope::parse(&bytes).expect("should parse");
        assert_eq!(parsed, env);
        assert_eq!(parsed.trans_job_request_payload().unwrap(), payload);
    }

    #[test]
    fn protocol_version_greater_than_ours_is_rejected() {
        let mut obj = serde_json::Map::new();
        obj.insert("prot_ver".to_owned(), (PROTOCOL_VERSION + 1).into());
        obj.insert("msg_type".to_owned(), MsgType::TransJobRequest.code().into());
        let bytes = serde_json::to_vec(&obj).unwrap();
        let err = Envelope::parse(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::ProtocolMismatch { .. }));
    }

    #[test]
    fn protocol_version_equal_or_lower_is_accepted() {
        let mut obj = serde_json::Map::new();
        obj.insert("prot_ver".to_owned(), PROTOCOL_VERSION.into());
        obj.insert("msg_type".to_owned(), MsgType::SuppLangRequest.code().into());
        let bytes = serde_json::to_vec(&obj).unwrap();
        assert!(Envelope::parse(&bytes).is_ok());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = Envelope::parse(b"{not-json").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedFrame(_)));
    }

    #[test]
    fn missing_mandatory_field_is_rejected_with_no_defaulting() {
        let mut obj = serde_json::Map::new();
        obj.insert("msg_type".to_owned(), MsgType::SuppLangRequest.code().into());
        let bytes = serde_json::to_vec(&obj).unwrap();
        let err = Envelope::parse(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField(ref f) if f == "prot_ver"));
    }

    #[test]
    fn missing_field_accessor_never_defaults() {
        let env = Envelope::build(MsgType::Undefined);
        let err = env.field::<String>("nonexistent").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField(ref f) if f == "nonexistent"));
    }

    #[test]
    fn processor_response_error_carries_no_chunk_fields() {
        let env = Envelope::proc_response("T1", StatCode::Error, "bad input", None);
        assert_eq!(env.stat_code().unwrap(), StatCode::Error);
        assert_eq!(env.stat_msg().unwrap(), "bad input");
        assert!(env.field::<String>("chunk").is_err());
    }

    #[test]
    fn processor_response_success_carries_chunk_fields() {
        let success = ProcessorResponse {
            job_token: "T1".into(),
            language: Some("en".into()),
            chunk: Some("hello".into()),
            chunk_idx: Some(0),
            num_chunks: Some(1),
        };
        let env = Envelope::proc_response("T1", StatCode::Ok, "", Some(success));
        assert_eq!(env.field::<String>("chunk").unwrap(), "hello");
        assert_eq!(env.field::<usize>("chunk_idx").unwrap(), 0);
        assert_eq!(env.field::<usize>("num_chunks").unwrap(), 1);
    }

    #[test]
    fn trans_job_response_payload_round_trips() {
        let payload = TranslationJobResponse {
            job_id: 3,
            target_data: vec![TargetSentData {
                trans_text: "Bonjour.".into(),
                stack_load: Some(1.5),
            }],
        };
        let env = Envelope::trans_job_response(&payload, StatCode::Ok, "");
        let bytes = env.serialize();
        let parsed = Envelope::parse(&bytes).unwrap();
        assert_eq!(parsed.trans_job_response_payload().unwrap(), payload);
    }

    #[test]
    fn supp_lang_round_trip() {
        let mut langs = HashMap::new();
        langs.insert("en".to_owned(), vec!["fr".to_owned(), "de".to_owned()]);
        let payload = SuppLangResponse { langs };
        let env = Envelope::supp_lang_response(&payload, StatCode::Ok, "ok");
        let bytes = env.serialize();
        let parsed = Envelope::parse(&bytes).unwrap();
        assert_eq!(parsed.field::<HashMap<String, Vec<String>>>("langs").unwrap(), payload.langs);
    }
}
