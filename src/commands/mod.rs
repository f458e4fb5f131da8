pub mod call_api;
pub mod util_api;

pub use call_api::CallController;
pub use util_api::check_ice_server_availability;
