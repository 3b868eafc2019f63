//! Maps `S4Error` onto the HTTP error taxonomy from spec.md §7: status code
//! from `S4Error::status_code()`, body shape depends on the error kind.

use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use s4_core::error::{S4Error, S4ErrorKind};
use serde::Serialize;

pub struct ApiError(pub S4Error);

impl From<S4Error> for ApiError {
    fn from(e: S4Error) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct CmdFailureBody {
    stdout: String,
    stderr: String,
    exitcode: i32,
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = Status::new(self.0.status_code());
        match self.0.kind {
            S4ErrorKind::CmdFailure { stdout, stderr, exitcode } => {
                let body = CmdFailureBody { stdout, stderr, exitcode };
                let mut res = Json(body).respond_to(request)?;
                res.set_status(status);
                Ok(res)
            }
            _ => {
                let body = ErrorBody { error: self.0.message };
                let mut res = Json(body).respond_to(request)?;
                res.set_status(status);
                Ok(res)
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
