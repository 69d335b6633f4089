//! Output key derivation.
//!
//! All three output keys are functions of the source key's base name, so
//! reprocessing a document overwrites its previous outputs.

use crate::Prefixes;

/// Base name of a key: the last `/` segment without its final extension.
/// A leading dot (hidden file) is not treated as an extension separator.
pub fn base_name(key: &str) -> &str {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Join a prefix and a name with exactly one `/` between them.
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

impl Prefixes {
    pub fn text_key_for(&self, name: &str) -> String {
        join(&self.output_text, &format!("{name}.txt"))
    }

    pub fn metadata_key_for(&self, name: &str) -> String {
        join(&self.output_metadata, &format!("{name}.json"))
    }

    pub fn error_key_for(&self, name: &str) -> String {
        join(&self.errors, &format!("{name}_error.json"))
    }

    /// Key under the input prefix for an uploaded file name.
    pub fn input_key(&self, file_name: &str) -> String {
        join(&self.input, file_name)
    }

    pub fn text_key(&self, source_key: &str) -> String {
        self.text_key_for(base_name(source_key))
    }

    pub fn metadata_key(&self, source_key: &str) -> String {
        self.metadata_key_for(base_name(source_key))
    }

    pub fn error_key(&self, source_key: &str) -> String {
        self.error_key_for(base_name(source_key))
    }
}
