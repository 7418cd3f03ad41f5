use regex::Regex;

use crate::config::NamePathConfig;

/// Maps an image name onto a backend relative path.
///
/// The configured pattern is matched against the name and the template
/// is expanded with the resulting capture groups, which lets the stored
/// files be sharded by a prefix of their name rather than all living in
/// one directory.
///
/// If the pattern does not match, the name itself is used as a flat path.
#[derive(Debug, Clone)]
pub struct NamePathMapper {
    pattern: Regex,
    template: String,
}

impl NamePathMapper {
    pub fn new(pattern: Regex, template: impl Into<String>) -> Self {
        Self {
            pattern,
            template: template.into(),
        }
    }

    pub fn from_config(cfg: &NamePathConfig) -> Result<Self, regex::Error> {
        Ok(Self::new(Regex::new(&cfg.pattern)?, cfg.template.clone()))
    }

    pub fn map(&self, name: &str) -> String {
        match self.pattern.captures(name) {
            Some(caps) => {
                let mut path = String::with_capacity(self.template.len() + name.len());
                caps.expand(&self.template, &mut path);
                path
            },
            None => name.to_string(),
        }
    }
}
