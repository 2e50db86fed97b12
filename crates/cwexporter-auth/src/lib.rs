pub mod credentials;
pub mod request;
pub mod signature_v4;
pub mod sts;

pub use credentials::{
    ChainCredentialProvider, CredentialProvider, Credentials, EnvCredentialProvider,
    ProfileCredentialProvider, StaticCredentialProvider,
};
pub use request::{FORM_CONTENT_TYPE, host_header, resolve_endpoint, signed_form_headers};
pub use signature_v4::{SigningParams, sign_request};
pub use sts::{AssumeRoleConfig, AssumeRoleProvider};
