pub mod response;
pub mod types;

pub use response::ResponseBuilder;
pub use types::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, GroupVersionKind, GroupVersionResource,
    Operation, ResponseStatus, UserInfo,
};
