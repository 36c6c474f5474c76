// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::path::Path;

use config::{Config, File, FileFormat};

mod audio;
mod error;
mod radio;

pub use audio::Audio;
pub use error::ConfigError;
pub use radio::Radio;

/// Loads the radio configuration. Without a path, every setting takes its default.
pub fn load(path: Option<&Path>) -> Result<Radio, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
    }
    Ok(builder.build()?.try_deserialize()?)
}

/// Parses the radio configuration from a YAML string.
#[cfg(test)]
pub fn parse(yaml: &str) -> Result<Radio, ConfigError> {
    Ok(Config::builder()
        .add_source(File::from_str(yaml, FileFormat::Yaml))
        .build()?
        .try_deserialize()?)
}

/// Renders the configuration as YAML.
pub fn to_yaml(radio: &Radio) -> Result<String, ConfigError> {
    Ok(serde_yml::to_string(radio)?)
}
