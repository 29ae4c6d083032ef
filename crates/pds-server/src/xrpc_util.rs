//! Mechanical wiring between a request/output struct pair and the
//! [`pds_common::xrpc`] trait machinery `pds-axum`'s [`pds_axum::ExtractXrpc`]
//! and [`pds_axum::IntoRouter`] dispatch on.
//!
//! Each XRPC method needs a zero-sized response marker (for [`XrpcResp`])
//! and a zero-sized endpoint marker (for [`XrpcEndpoint`]) in addition to
//! its request/output structs; this macro generates both plus the glue
//! impls so route modules only declare the structs and field shapes.

/// ```ignore
/// xrpc_endpoint! {
///     nsid: "com.atproto.server.getSession",
///     method: pds_common::xrpc::XrpcMethod::Query,
///     endpoint: GetSession,
///     response: GetSessionResponse,
///     request: GetSessionRequest,
///     output: GetSessionOutput,
/// }
/// ```
macro_rules! xrpc_endpoint {
    (
        nsid: $nsid:literal,
        method: $method:expr,
        endpoint: $endpoint:ident,
        response: $response:ident,
        request: $req:ty,
        output: $out:ty $(,)?
    ) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $endpoint;

        #[derive(Debug, Clone, Copy)]
        pub struct $response;

        impl pds_common::xrpc::XrpcResp for $response {
            const NSID: &'static str = $nsid;
            const ENCODING: &'static str = "application/json";
            type Output<'de> = $out;
            type Err<'de> = pds_common::xrpc::GenericError<'de>;
        }

        impl pds_common::xrpc::XrpcEndpoint for $endpoint {
            const PATH: &'static str = concat!("/xrpc/", $nsid);
            const METHOD: pds_common::xrpc::XrpcMethod = $method;
            type Request<'de> = $req;
            type Response = $response;
        }

        impl pds_common::xrpc::XrpcRequest for $req {
            const NSID: &'static str = $nsid;
            const METHOD: pds_common::xrpc::XrpcMethod = $method;
            type Response = $response;
        }

        impl pds_common::IntoStatic for $req {
            type Output = $req;
            fn into_static(self) -> Self::Output {
                self
            }
        }

        impl pds_common::IntoStatic for $out {
            type Output = $out;
            fn into_static(self) -> Self::Output {
                self
            }
        }
    };
}

pub(crate) use xrpc_endpoint;

/// Placeholder `Output` for endpoints whose handler builds the
/// [`axum::response::Response`] by hand (CAR bodies, raw blob bytes) instead
/// of going through [`pds_common::xrpc::XrpcResp::encode_output`].
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct NoOutput;

impl pds_common::IntoStatic for NoOutput {
    type Output = NoOutput;
    fn into_static(self) -> Self::Output {
        self
    }
}
