mod stager;

pub use stager::{UploadRequest, UploadResult, UploadStager};
