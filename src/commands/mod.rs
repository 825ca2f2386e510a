pub mod import;
pub mod normalizer;
pub mod probe;
pub mod run;
pub mod settings;
pub mod status;
