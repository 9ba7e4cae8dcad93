use axum::http::StatusCode;
use bytes::{BufMut, Bytes, BytesMut};
use tonic::{Code, Status};

/// The closed set of wire encodings dispatch accepts.
///
/// Content negotiation is variant dispatch over this enum, never scattered
/// header sniffing. Anything outside the set is rejected with 415 before
/// the body is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    /// Connect unary: a bare protobuf body, errors as JSON with a Connect
    /// code string and a mapped HTTP status.
    Connect,
    /// gRPC-Web: 5-byte envelope framing with an in-body trailers frame.
    GrpcWeb,
}

const DATA_FRAME: u8 = 0x00;
const TRAILER_FRAME: u8 = 0x80;

impl WireProtocol {
    /// Negotiate a protocol from a request content-type, ignoring
    /// parameters such as charset.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/proto" | "application/connect+proto" => Some(Self::Connect),
            "application/grpc-web" | "application/grpc-web+proto" => Some(Self::GrpcWeb),
            _ => None,
        }
    }

    /// The content-type set on successful responses.
    pub fn response_content_type(&self) -> &'static str {
        match self {
            Self::Connect => "application/proto",
            Self::GrpcWeb => "application/grpc-web+proto",
        }
    }

    /// Extract the encoded request message from the request body.
    pub fn unframe_request(&self, body: Bytes) -> Result<Bytes, Status> {
        match self {
            Self::Connect => Ok(body),
            Self::GrpcWeb => unframe_grpc_web(body),
        }
    }

    /// Wrap an encoded response message for the wire.
    pub fn frame_response(&self, message: Bytes) -> Bytes {
        match self {
            Self::Connect => message,
            Self::GrpcWeb => {
                let mut framed = BytesMut::with_capacity(message.len() + 10);
                put_frame(&mut framed, DATA_FRAME, &message);
                put_frame(&mut framed, TRAILER_FRAME, &grpc_web_trailers(Code::Ok, ""));
                framed.freeze()
            }
        }
    }

    /// Render a failed dispatch as protocol bytes plus HTTP status and
    /// content type.
    pub fn frame_error(&self, status: &Status) -> (StatusCode, &'static str, Bytes) {
        match self {
            Self::Connect => {
                let body = serde_json::json!({
                    "code": connect_code_string(status.code()),
                    "message": status.message(),
                });
                (
                    connect_http_status(status.code()),
                    "application/json",
                    Bytes::from(body.to_string()),
                )
            }
            // gRPC-Web carries failures in the trailers frame of an HTTP
            // 200 response.
            Self::GrpcWeb => {
                let mut framed = BytesMut::new();
                put_frame(
                    &mut framed,
                    TRAILER_FRAME,
                    &grpc_web_trailers(status.code(), status.message()),
                );
                (
                    StatusCode::OK,
                    self.response_content_type(),
                    framed.freeze(),
                )
            }
        }
    }
}

fn put_frame(buf: &mut BytesMut, flags: u8, payload: &[u8]) {
    buf.put_u8(flags);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

fn unframe_grpc_web(body: Bytes) -> Result<Bytes, Status> {
    if body.len() < 5 {
        return Err(Status::invalid_argument(
            "gRPC-Web body shorter than the frame envelope",
        ));
    }
    let flags = body[0];
    if flags != DATA_FRAME {
        return Err(Status::invalid_argument(format!(
            "expected a data frame, got flags {flags:#04x}"
        )));
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if body.len() < 5 + len {
        return Err(Status::invalid_argument(format!(
            "frame length {len} exceeds body of {} bytes",
            body.len() - 5
        )));
    }
    Ok(body.slice(5..5 + len))
}

fn grpc_web_trailers(code: Code, message: &str) -> Vec<u8> {
    // CR and LF would corrupt the trailer block.
    let message = message.replace(['\r', '\n'], " ");
    let mut trailers = format!("grpc-status: {}\r\n", code as i32);
    if !message.is_empty() {
        trailers.push_str(&format!("grpc-message: {message}\r\n"));
    }
    trailers.into_bytes()
}

/// The Connect protocol's snake_case error code strings.
pub fn connect_code_string(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Cancelled => "canceled",
        Code::Unknown => "unknown",
        Code::InvalidArgument => "invalid_argument",
        Code::DeadlineExceeded => "deadline_exceeded",
        Code::NotFound => "not_found",
        Code::AlreadyExists => "already_exists",
        Code::PermissionDenied => "permission_denied",
        Code::ResourceExhausted => "resource_exhausted",
        Code::FailedPrecondition => "failed_precondition",
        Code::Aborted => "aborted",
        Code::OutOfRange => "out_of_range",
        Code::Unimplemented => "unimplemented",
        Code::Internal => "internal",
        Code::Unavailable => "unavailable",
        Code::DataLoss => "data_loss",
        Code::Unauthenticated => "unauthenticated",
    }
}

/// The Connect protocol's RPC-code-to-HTTP-status mapping.
pub fn connect_http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled | Code::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
        Code::InvalidArgument | Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_closed_set() {
        assert_eq!(
            WireProtocol::from_content_type("application/proto"),
            Some(WireProtocol::Connect)
        );
        assert_eq!(
            WireProtocol::from_content_type("application/connect+proto"),
            Some(WireProtocol::Connect)
        );
        assert_eq!(
            WireProtocol::from_content_type("application/grpc-web+proto; charset=utf-8"),
            Some(WireProtocol::GrpcWeb)
        );
        assert_eq!(WireProtocol::from_content_type("application/json"), None);
        assert_eq!(WireProtocol::from_content_type("text/plain"), None);
    }

    #[test]
    fn test_connect_body_passes_through() {
        let body = Bytes::from_static(b"\x0a\x03abc");
        let unframed = WireProtocol::Connect.unframe_request(body.clone()).unwrap();
        assert_eq!(unframed, body);
        assert_eq!(WireProtocol::Connect.frame_response(body.clone()), body);
    }

    #[test]
    fn test_grpc_web_frame_round_trip() {
        let message = Bytes::from_static(b"\x0a\x03abc");
        let framed = WireProtocol::GrpcWeb.frame_response(message.clone());

        // Data frame first.
        assert_eq!(framed[0], DATA_FRAME);
        let unframed = WireProtocol::GrpcWeb.unframe_request(framed.clone()).unwrap();
        assert_eq!(unframed, message);

        // Trailer frame carries grpc-status 0.
        let trailer_offset = 5 + message.len();
        assert_eq!(framed[trailer_offset], TRAILER_FRAME);
        let trailers = &framed[trailer_offset + 5..];
        assert!(std::str::from_utf8(trailers).unwrap().contains("grpc-status: 0"));
    }

    #[test]
    fn test_grpc_web_truncated_frame() {
        let err = WireProtocol::GrpcWeb
            .unframe_request(Bytes::from_static(b"\x00\x00\x00\x00\x09abc"))
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_connect_error_shape() {
        let status = Status::not_found("no such function");
        let (http, content_type, body) = WireProtocol::Connect.frame_error(&status);
        assert_eq!(http, StatusCode::NOT_FOUND);
        assert_eq!(content_type, "application/json");

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "not_found");
        assert_eq!(json["message"], "no such function");
    }

    #[test]
    fn test_grpc_web_error_is_trailers_only_200() {
        let status = Status::unimplemented("nope");
        let (http, _, body) = WireProtocol::GrpcWeb.frame_error(&status);
        assert_eq!(http, StatusCode::OK);
        assert_eq!(body[0], TRAILER_FRAME);
        let trailers = std::str::from_utf8(&body[5..]).unwrap();
        assert!(trailers.contains("grpc-status: 12"));
        assert!(trailers.contains("grpc-message: nope"));
    }
}
