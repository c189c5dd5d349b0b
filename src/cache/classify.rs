//! Request classification.

use url::Url;

use crate::domain::types::ResourceClass;

/// Maps a request locator to exactly one [`ResourceClass`].
///
/// Rules are checked in order: image extension, then API prefix, then
/// `static`. Classification never fails.
#[derive(Debug, Clone)]
pub struct Classifier {
    api_prefixes: Vec<String>,
    image_extensions: Vec<String>,
}

impl Classifier {
    pub fn new(api_prefixes: Vec<String>, image_extensions: Vec<String>) -> Self {
        let image_extensions = image_extensions
            .into_iter()
            .map(|ext| ext.to_ascii_lowercase())
            .collect();
        Self {
            api_prefixes,
            image_extensions,
        }
    }

    pub fn classify(&self, url: &Url) -> ResourceClass {
        self.classify_path(url.path())
    }

    pub fn classify_path(&self, path: &str) -> ResourceClass {
        if self.has_image_extension(path) {
            ResourceClass::Image
        } else if self
            .api_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            ResourceClass::Data
        } else {
            ResourceClass::Static
        }
    }

    fn has_image_extension(&self, path: &str) -> bool {
        let segment = path.rsplit('/').next().unwrap_or(path);
        segment
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.image_extensions.iter().any(|known| *known == ext))
    }
}

/// Content type for a stored body when the upstream did not send one.
pub fn guess_content_type(url: &Url) -> String {
    mime_guess::from_path(url.path())
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}
