#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("feed error: {0}")]
    Feed(#[from] crate::feed::FeedError),
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
    #[error("delivery error: {0}")]
    Delivery(#[from] crate::delivery::DeliveryError),
    #[error("document store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("trigger error: {0}")]
    Trigger(#[from] crate::store::TriggerError),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        Error: From<E>,
    {
        error.into()
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// HTTP status a trigger administration caller should see for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Trigger(err) => err.status_code(),
            Error::Context { source, .. } => source.status_code(),
            Error::Store(crate::store::StoreError::NotFound { .. }) => 404,
            Error::Store(crate::store::StoreError::Conflict { .. }) => 409,
            _ => 500,
        }
    }
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
    ($err:expr) => {{
        $crate::error::Error::new($err)
    }};
}

#[macro_export]
macro_rules! bail_err {
    ($($arg:tt)*) => {{
        return Err($crate::err!($($arg)*));
    }};
}
