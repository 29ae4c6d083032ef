#[macro_use]
pub mod cowstr;
#[macro_use]
pub mod into_static;

pub mod types;

pub mod error;
pub mod http_client;
pub mod identity;
pub mod service_auth;
pub mod stream;
pub mod xrpc;

pub use cowstr::CowStr;
pub use into_static::IntoStatic;

pub use smol_str;
pub use url;
