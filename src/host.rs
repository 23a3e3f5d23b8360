//! The host application, seen from the plugin.
//!
//! The host owns file storage, panels, commands and the settings UI. The plugin
//! only ever reaches it through the [`Host`] trait.

use async_trait::async_trait ;
use nonempty_collections::NEVec ;
use thiserror::Error ;

use crate::capability::{ MountTarget, SerializedDocument };
use crate::settings::SettingsTab ;



/// A `/`-separated path inside the host's vault. The empty path is the vault root.
#[derive( Clone, Debug, Default, PartialEq, Eq, Hash )]
pub struct VaultPath( String );

impl VaultPath {

	/// Normalises `path`: leading, trailing and repeated separators are dropped.
	pub fn new( path: impl AsRef<str> ) -> Self {
		Self( path.as_ref().split( '/' ).filter(| segment | !segment.is_empty() ).collect::<Vec<_>>().join( "/" ))
	}

	#[inline] pub fn root() -> Self { Self( String::new() )}
	#[inline] pub fn is_root( &self ) -> bool { self.0.is_empty() }
	#[inline] pub fn as_str( &self ) -> &str { &self.0 }

	/// The containing folder. `None` for the root itself.
	pub fn parent( &self ) -> Option<Self> {
		if self.is_root() { return None }
		Some( match self.0.rsplit_once( '/' ) {
			Some(( parent, _ )) => Self( parent.to_string() ),
			None => Self::root(),
		})
	}

	pub fn join( &self, name: &str ) -> Self {
		match self.is_root() {
			true => Self::new( name ),
			false => Self::new( format!( "{}/{}", self.0, name )),
		}
	}

	/// The last segment, if any.
	pub fn file_name( &self ) -> Option<&str> {
		self.0.rsplit( '/' ).next().filter(| name | !name.is_empty() )
	}

	/// The text after the last `.` of the file name, if there is one.
	pub fn extension( &self ) -> Option<&str> {
		let ( stem, extension ) = self.file_name()?.rsplit_once( '.' )?;
		( !stem.is_empty() ).then_some( extension )
	}

}

impl std::fmt::Display for VaultPath {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		match self.is_root() {
			true => f.write_str( "/" ),
			false => f.write_str( &self.0 ),
		}
	}
}

/// A document type the host routes files to by extension.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct DocumentType {
	pub view_type: String,
	pub extensions: NEVec<String>,
}

/// A command shown in the host's command palette.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct CommandSpec {
	pub id: String,
	pub name: String,
}

/// Errors reported by the host.
#[derive( Debug, Error )]
pub enum HostError {
	/// A file already exists at the path. Hosts must never overwrite on create.
	#[error( "File already exists: {0}" )] AlreadyExists( VaultPath ),
	#[error( "Registration rejected: {0}" )] Registration( String ),
	#[error( "Storage error: {0}" )] Storage( String ),
	#[error( "Container error: {0}" )] Container( String ),
}

/// Everything the plugin needs from the host application.
#[async_trait]
pub trait Host: Send + Sync {

	/// Routes files with the given extensions to panels of `document_type.view_type`.
	///
	/// # Errors
	/// The host refused the registration.
	fn register_view( &self, document_type: &DocumentType ) -> Result<(), HostError> ;

	/// # Errors
	/// The host refused the registration.
	fn register_command( &self, command: &CommandSpec ) -> Result<(), HostError> ;

	/// # Errors
	/// The host refused the registration.
	fn register_settings_tab( &self, tab: &SettingsTab ) -> Result<(), HostError> ;

	/// Creates a block container inside `parent`.
	///
	/// # Errors
	/// The host could not create the container.
	fn create_child_container( &self, parent: &MountTarget ) -> Result<MountTarget, HostError> ;

	/// Creates a new file.
	///
	/// # Errors
	/// [`HostError::AlreadyExists`] if something is already at `path`, otherwise
	/// whatever the storage layer reports.
	async fn create_file( &self, path: &VaultPath, data: &SerializedDocument ) -> Result<(), HostError> ;

	/// Opens `path` in a new panel.
	///
	/// # Errors
	/// The host could not open the file.
	async fn open_in_new_panel( &self, path: &VaultPath ) -> Result<(), HostError> ;

	/// Shows a transient message to the user.
	fn notice( &self, message: &str );

}
