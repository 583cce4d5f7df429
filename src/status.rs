//! Status codes carried in the `[statusCode, payload]` response envelope.
//!
//! Single integer status code per response; ranges allocated per the
//! protocol document. `SUCCESS` is always `0`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i64)]
pub enum StatusCode {
    Success = 0,

    ErrNoLogin = 201,
    ErrUserUndefined = 202,
    ErrPswdUnmatch = 203,
    ErrNoPermission = 204,
    ErrUserRelogin = 205,

    ErrFileNotExist = 301,
    ErrFileAlreadyExist = 302,
    ErrDirNotExist = 303,
    ErrDirAlreadyExist = 304,

    ErrServerBusy = 401,

    ErrUndefCmd = 501,
}

impl StatusCode {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

impl From<StatusCode> for i64 {
    fn from(value: StatusCode) -> Self {
        value.code()
    }
}
