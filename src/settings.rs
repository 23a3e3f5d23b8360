//! Plugin settings.
//!
//! There are no options yet. The schema still exists so the settings tab has a
//! stable contract and unknown keys in a stored configuration are reported rather
//! than silently ignored. Every option added here must be listed by
//! [`Settings::options`] together with its effect.

use serde::{ Deserialize, Serialize };
use thiserror::Error ;



#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default, deny_unknown_fields )]
pub struct Settings {}

#[derive( Debug, Error )]
pub enum SettingsError {
	#[error( "Invalid settings: {0}" )] Parse( #[from] toml::de::Error ),
	#[error( "Failed to serialise settings: {0}" )] Serialise( #[from] toml::ser::Error ),
}

/// A documented option as shown on the settings tab.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct SettingOption {
	pub key: String,
	pub effect: String,
}

/// What the host renders for the plugin's settings.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct SettingsTab {
	pub title: String,
	pub options: Vec<SettingOption>,
}

impl Settings {

	/// # Errors
	/// The source is not valid TOML or contains unknown keys.
	pub fn from_toml( source: &str ) -> Result<Self, SettingsError> {
		Ok( toml::from_str( source )? )
	}

	/// # Errors
	/// Serialisation failed.
	pub fn to_toml( &self ) -> Result<String, SettingsError> {
		Ok( toml::to_string( self )? )
	}

	pub fn options( &self ) -> Vec<SettingOption> { Vec::new() }

	pub fn tab( &self, title: impl Into<String> ) -> SettingsTab {
		SettingsTab { title: title.into(), options: self.options() }
	}

}
