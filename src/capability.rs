//! The capability surface of the compute module.
//!
//! Everything this crate knows about LogicX documents goes through the two traits
//! defined here. A [`ComputeModule`] hands out [`ComputeContext`]s, and a context
//! owns one document: its serialized form, its rendering and its interaction state.
//! The wasmtime-backed implementation lives in [`crate::WasmModule`]; tests provide
//! in-memory ones.

use thiserror::Error ;



/// The edit/play flag of a document.
///
/// `edit == true` means the document is being authored, `edit == false` means it
/// is being executed. The context owns the authoritative value; everybody else
/// holds a copy.
#[derive( Copy, Clone, Debug, Default, PartialEq, Eq, Hash )]
pub struct InteractionState {
	pub edit: bool,
}

impl InteractionState {
	/// Authoring mode.
	pub const EDIT: Self = Self { edit: true };
	/// Run mode.
	pub const PLAY: Self = Self { edit: false };

	/// Returns a copy with the `edit` flag replaced.
	#[inline] pub fn with_edit( self, edit: bool ) -> Self { Self { edit, ..self }}

	/// Returns the state with the `edit` flag flipped.
	#[inline] pub fn toggled( self ) -> Self { self.with_edit( !self.edit )}
}

/// The persisted form of a document. Opaque at this layer.
#[derive( Clone, Debug, Default, PartialEq, Eq, Hash )]
pub struct SerializedDocument( String );

impl SerializedDocument {
	#[inline] pub fn new( data: impl Into<String> ) -> Self { Self( data.into() )}
	#[inline] pub fn as_str( &self ) -> &str { &self.0 }
	#[inline] pub fn into_string( self ) -> String { self.0 }
	#[inline] pub fn is_empty( &self ) -> bool { self.0.is_empty() }
}

impl From<String> for SerializedDocument {
	fn from( data: String ) -> Self { Self( data )}
}

impl From<&str> for SerializedDocument {
	fn from( data: &str ) -> Self { Self( data.to_string() )}
}

impl std::fmt::Display for SerializedDocument {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result { f.write_str( &self.0 )}
}

/// Host-assigned identifier of a UI container.
#[derive( Copy, Clone, Debug, PartialEq, Eq, Hash )]
pub struct ContainerId( pub u64 );

impl std::fmt::Display for ContainerId {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result { write!( f, "#{}", self.0 )}
}

/// What kind of element a container is.
///
/// The compute module only renders into block containers. Anything else needs a
/// block child created by the host first.
#[derive( Copy, Clone, Debug, PartialEq, Eq, Hash )]
pub enum ContainerKind {
	Block,
	Other,
}

/// A host container a session renders into. Not owned by the session.
#[derive( Copy, Clone, Debug, PartialEq, Eq, Hash )]
pub struct MountTarget {
	pub container: ContainerId,
	pub kind: ContainerKind,
}

impl MountTarget {
	#[inline] pub fn block( container: ContainerId ) -> Self { Self { container, kind: ContainerKind::Block }}
	#[inline] pub fn is_block( &self ) -> bool { self.kind == ContainerKind::Block }
}

/// Errors reported by a context or the module behind it.
#[derive( Debug, Error )]
pub enum ContextError {
	/// The module's exports have not been bound yet.
	#[error( "Module Not Ready" )] ModuleNotReady,
	/// The module's store is poisoned or busy.
	#[error( "Lock Rejected" )] LockRejected,
	/// The module trapped while handling the call.
	#[error( "Runtime Exception: {0}" )] RuntimeException( wasmtime::Error ),
	/// The module answered with a value of the wrong shape.
	#[error( "Unexpected Response: {0}" )] UnexpectedResponse( String ),
	/// The context was already released.
	#[error( "Context Released" )] Released,
	/// Called from a state listener while the module is still busy with the
	/// call that produced the notification.
	#[error( "Re-entrant Call From State Listener" )] Reentrant,
	/// The module refused the request.
	#[error( "Rejected: {0}" )] Rejected( String ),
}

/// Callback invoked with every state the context reports, in emission order.
pub type StateListener = Box<dyn FnMut( InteractionState ) + Send> ;

/// A compiled and linked compute module.
pub trait ComputeModule: Send + Sync {
	/// Creates a fresh, empty document context.
	///
	/// # Errors
	/// Fails if the module is not bound yet or traps in the constructor.
	fn create_context( &self ) -> Result<Box<dyn ComputeContext>, ContextError> ;
}

/// One live document inside the compute module.
///
/// # Errors
/// Every method fails with [`ContextError::Released`] once [`release`]( Self::release )
/// has been called, and with whatever the module reports otherwise.
pub trait ComputeContext: Send {
	fn get_data( &mut self ) -> Result<SerializedDocument, ContextError> ;
	/// `clear` discards in-memory editing state before loading `data`.
	fn set_data( &mut self, data: &SerializedDocument, clear: bool ) -> Result<(), ContextError> ;
	fn clear( &mut self ) -> Result<(), ContextError> ;
	fn mount( &mut self, container: ContainerId ) -> Result<(), ContextError> ;
	fn get_state( &mut self ) -> Result<InteractionState, ContextError> ;
	/// Requests a state. The context may apply it later, coalesce it or ignore it;
	/// the outcome is only observable through the state listener.
	fn set_state( &mut self, state: InteractionState ) -> Result<(), ContextError> ;
	/// Installs the state listener, replacing any previous one.
	fn on_state_changed( &mut self, listener: StateListener ) -> Result<(), ContextError> ;
	/// Removes the state listener, if any.
	fn remove_state_listener( &mut self );
	/// Releases the module-side resources. Must be called at most once.
	fn release( &mut self ) -> Result<(), ContextError> ;
}
