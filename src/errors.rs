use std::io;

/// State-discipline violations (double lock, unbalanced unbind, handle access
/// from the wrong thread) are programmer errors. Development builds terminate
/// immediately so the bug surfaces before it corrupts GPU state; release
/// builds log the violation and continue best-effort. Call sites still return
/// an `Err` so the caller of a release build can back out.
macro_rules! fault {
    ($($arg:tt)*) => {{
        if cfg!(all(debug_assertions, not(test))) {
            panic!($($arg)*);
        } else {
            error!($($arg)*);
        }
    }};
}

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "Backend: {}", _0)]
    Backend(String),
    #[fail(display = "[GL] error 0x{:04x} after {}.", _0, _1)]
    Gl(u32, &'static str),
    #[fail(display = "Invalid dimensions {}x{}.", _0, _1)]
    InvalidDimensions(u32, u32),
    #[fail(display = "{} is not supported by this backend.", _0)]
    UnsupportedFormat(String),
    #[fail(display = "Out of bounds.")]
    OutOfBounds,
    #[fail(display = "Pixel store is already locked.")]
    AlreadyLocked,
    #[fail(display = "Attribute {} was not declared at creation.", _0)]
    AttributeInvalid(u32),
    #[fail(display = "Vertex layout declares no attributes.")]
    EmptyLayout,
    #[fail(display = "Attribute {} is declared more than once.", _0)]
    DuplicateAttribute(u32),
    #[fail(display = "Framebuffer is incomplete: {}.", _0)]
    IncompleteFrameBuffer(String),
    #[fail(
        display = "Attachment is {}x{} but the framebuffer is {}x{}.",
        _0, _1, _2, _3
    )]
    AttachmentSizeMismatch(u32, u32, u32, u32),
    #[fail(display = "Context {} is not a live context of this device.", _0)]
    ContextInvalid(u32),
    #[fail(display = "No record found for key '{}'.", _0)]
    NotFound(String),
    #[fail(display = "I/O: {}", _0)]
    Io(#[fail(cause)] io::Error),
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
