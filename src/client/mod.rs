pub mod http;
pub mod rest;

pub use self::http::{HttpClient, HttpClientBuilder};
pub use self::rest::{RestClient, RestResponse, REST_CLIENT_LOG_TARGET};
