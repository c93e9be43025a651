pub mod extensions_api;

pub use extensions_api::{
    create_nonce, extension_status, install_action, list_extensions, ExtensionApiError,
    ExtensionInfo, NonceResponse, StatusResponse,
};
