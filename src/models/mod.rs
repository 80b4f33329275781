mod download;
mod local;
mod manager;
mod provisioner;
mod reference;
mod service;

pub use download::{
    download_and_extract, install_staged, plan_for as build_download_plan, sha256_file,
    DownloadOutcome, DownloadPlan,
};
pub use local::{load_local_manifest, LocalModelManifest, ResolvedLocalModel};
pub use manager::{
    install_dir, ArchiveFormat, ModelManager, ModelSource, ModelStatus, RemoteModelRecord,
};
pub use provisioner::{DownloadConditions, HttpProvisioner, ModelProvisioning};
pub use reference::{
    LocalModel, ModelReference, ModelReferences, RemoteModel, DATA_MODEL, LOCAL_MODEL_PATH,
};
pub use service::{ModelDownloadJob, ModelDownloadService, RetryPolicy};
