// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! JSON-RPC style control protocol.
//!
//! Requests are decoded in two steps: the envelope first, then `params`
//! according to `method`. Error responses carry the error object under the
//! `params` key with the message in a field literally named `string`; existing
//! clients depend on both.

use crate::errors::SupervisorError;
use crate::state::ProcessStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request id used when the id of a malformed request cannot be recovered.
pub const UNKNOWN_REQUEST_ID: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// A supervisor operation was understood but failed.
    OperationFailed,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::OperationFailed => 501,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            501 => Some(ErrorCode::OperationFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    ListProcesses,
    StartProcess,
    StopProcess,
    DeleteProcess,
    RequestStopService,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::ListProcesses => "listProcesses",
            Method::StartProcess => "startProcess",
            Method::StopProcess => "stopProcess",
            Method::DeleteProcess => "deleteProcess",
            Method::RequestStopService => "requestStopService",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "listProcesses" => Ok(Method::ListProcesses),
            "startProcess" => Ok(Method::StartProcess),
            "stopProcess" => Ok(Method::StopProcess),
            "deleteProcess" => Ok(Method::DeleteProcess),
            "requestStopService" => Ok(Method::RequestStopService),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub exec: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: String,
}

/// Params of `stopProcess` and `deleteProcess`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdParams {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Reserved for selecting processes by name or namespace. Not honored yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl ProcessIdParams {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ListProcesses,
    StartProcess(StartProcessParams),
    StopProcess(ProcessIdParams),
    DeleteProcess(ProcessIdParams),
    RequestStopService,
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::ListProcesses => Method::ListProcesses,
            Request::StartProcess(_) => Method::StartProcess,
            Request::StopProcess(_) => Method::StopProcess,
            Request::DeleteProcess(_) => Method::DeleteProcess,
            Request::RequestStopService => Method::RequestStopService,
        }
    }

    fn params(&self) -> serde_json::Result<Value> {
        match self {
            Request::ListProcesses | Request::RequestStopService => Ok(json!({})),
            Request::StartProcess(p) => serde_json::to_value(p),
            Request::StopProcess(p) | Request::DeleteProcess(p) => serde_json::to_value(p),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RequestEnvelope {
    jsonrpc: String,
    method: String,
    id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// A request that decoded successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub id: i64,
    pub request: Request,
}

/// A request that could not be decoded, with the id to answer it under.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub id: i64,
    pub error: ProtocolError,
}

impl DecodeFailure {
    pub fn into_response(self) -> Response {
        Response::error(self.id, self.error)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<Value>,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError, "Parse error")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    pub fn invalid_params(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidParams, format!("Invalid params: {message}"))
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, format!("Internal error: {message}"))
    }

    /// `context` reads like "Could not stop process".
    pub fn operation_failed(context: &str, err: &SupervisorError) -> Self {
        Self {
            code: ErrorCode::OperationFailed,
            message: format!("{context}: {err}"),
            data: Some(json!({ "kind": err.kind() })),
        }
    }
}

pub fn encode_request(id: i64, request: &Request) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&RequestEnvelope {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method: request.method().as_str().to_string(),
        id,
        params: Some(request.params()?),
    })
}

pub fn decode_request(data: &[u8]) -> Result<IncomingRequest, DecodeFailure> {
    let value: Value = serde_json::from_slice(data).map_err(|_| DecodeFailure {
        id: scan_request_id(data).unwrap_or(UNKNOWN_REQUEST_ID),
        error: ProtocolError::parse_error(),
    })?;

    let id = value
        .get("id")
        .and_then(Value::as_i64)
        .unwrap_or(UNKNOWN_REQUEST_ID);
    let fail = |error: ProtocolError| DecodeFailure { id, error };

    let envelope: RequestEnvelope =
        serde_json::from_value(value).map_err(|_| fail(ProtocolError::parse_error()))?;

    if envelope.jsonrpc != JSONRPC_VERSION {
        return Err(fail(ProtocolError::new(
            ErrorCode::InvalidRequest,
            format!("Unsupported protocol version {:?}", envelope.jsonrpc),
        )));
    }

    let method: Method = envelope
        .method
        .parse()
        .map_err(|()| fail(ProtocolError::method_not_found(&envelope.method)))?;

    let params = envelope.params.unwrap_or(Value::Null);
    let request = match method {
        Method::ListProcesses => Request::ListProcesses,
        Method::RequestStopService => Request::RequestStopService,
        Method::StartProcess => {
            let p: StartProcessParams = serde_json::from_value(params)
                .map_err(|e| fail(ProtocolError::invalid_params(e)))?;
            if p.exec.is_empty() {
                return Err(fail(ProtocolError::invalid_params("exec must not be empty")));
            }
            Request::StartProcess(p)
        }
        Method::StopProcess | Method::DeleteProcess => {
            let p: ProcessIdParams = if params.is_null() {
                ProcessIdParams::default()
            } else {
                serde_json::from_value(params).map_err(|e| fail(ProtocolError::invalid_params(e)))?
            };
            if p.id.is_empty() {
                return Err(fail(ProtocolError::invalid_params("missing process id")));
            }
            if method == Method::StopProcess {
                Request::StopProcess(p)
            } else {
                Request::DeleteProcess(p)
            }
        }
    };

    Ok(IncomingRequest { id, request })
}

/// Find `"id": <integer>` in a payload that is not valid JSON.
fn scan_request_id(data: &[u8]) -> Option<i64> {
    let text = String::from_utf8_lossy(data);
    let mut rest = text.as_ref();
    while let Some(pos) = rest.find("\"id\"") {
        rest = rest.get(pos + 4..)?;
        // `"id"` as a value rather than a key.
        let Some(after_colon) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let after_colon = after_colon.trim_start();
        let digits: String = after_colon
            .chars()
            .enumerate()
            .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
            .map(|(_, c)| c)
            .collect();
        if let Ok(id) = digits.parse() {
            return Some(id);
        }
    }
    None
}

/// Wire form of one process table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub exec: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: String,
    /// Milliseconds since the last start, 0 unless running.
    pub uptime: u64,
    pub status: ProcessStatus,
    pub exit_code: i32,
    #[serde(default)]
    pub start_count: u32,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub respawn_delay: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_list: Option<Vec<ProcessSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
}

impl ResponseResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    #[serde(rename = "string")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponseResult>,
    #[serde(rename = "params", default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn success(id: i64, result: ResponseResult) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: i64, err: ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ResponseError {
                code: err.code.code(),
                message: err.message,
                data: err.data,
            }),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Split into the result or the error the service reported.
    pub fn into_result(self) -> Result<ResponseResult, ResponseError> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(ResponseResult::default()),
        }
    }
}
