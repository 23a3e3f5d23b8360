//! One open document bound to one module context.
//!
//! A [`Session`] exclusively owns its [`ComputeContext`]. It is the only path to
//! that context: panels and toggles talk to the session, never to the context.
//! The session mirrors the context's interaction state, but the mirror is only
//! ever written from the context's own state notifications.

use std::sync::{ Arc, Mutex, Weak };
use std::sync::atomic::{ AtomicU64, Ordering };
use thiserror::Error ;
use tracing::{ debug, info, warn };

use crate::capability::{
	ComputeContext, ContainerId, ContextError, InteractionState, MountTarget, SerializedDocument,
};
use crate::host::VaultPath ;
use crate::module_linker::{ CompiledModule, LinkerError, ModuleLinker };



/// Process-unique identifier of a session, used in logs and errors.
#[derive( Copy, Clone, Debug, PartialEq, Eq, Hash )]
pub struct SessionId( u64 );

impl SessionId {
	fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new( 1 );
		Self( NEXT.fetch_add( 1, Ordering::Relaxed ))
	}
}

impl std::fmt::Display for SessionId {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result { write!( f, "session-{}", self.0 )}
}

/// Misuse of the session lifecycle.
#[derive( Debug, Error, Clone, PartialEq, Eq )]
pub enum SessionLifecycleError {
	/// The session was already torn down; its context is gone.
	#[error( "{0} was already torn down" )] AlreadyTornDown( SessionId ),
	/// A different file was opened into a panel whose session was never closed.
	#[error( "{session} is still bound to {bound} while {requested} is being opened" )]
	StaleSession { session: SessionId, bound: VaultPath, requested: VaultPath },
}

#[derive( Debug, Error )]
pub enum SessionError {
	/// The compute module is not available.
	#[error( "Module Error: {0}" )] Module( #[from] LinkerError ),
	/// The context rejected or failed a call.
	#[error( "Context Error: {0}" )] Context( #[from] ContextError ),
	/// The session already renders into a container.
	#[error( "Already mounted into container {0}" )] AlreadyMounted( ContainerId ),
	/// The session's single observer slot is taken.
	#[error( "Observer Already Registered" )] ObserverAlreadyRegistered,
	#[error( "Lifecycle Error: {0}" )] Lifecycle( #[from] SessionLifecycleError ),
	/// The session's shared state is poisoned.
	#[error( "Lock Rejected" )] LockRejected,
}

/// Receives every interaction state the context reports.
pub type StateObserver = Box<dyn FnMut( InteractionState ) + Send> ;

struct Shared {
	state: InteractionState,
	observer: Option<StateObserver>,
}

impl Shared {
	fn apply( &mut self, state: InteractionState ) {
		self.state = state ;
		if let Some( observer ) = self.observer.as_mut() { observer( state ); }
	}
}

/// The owning wrapper around exactly one module context.
pub struct Session {
	id: SessionId,
	context: Option<Box<dyn ComputeContext>>,
	mount_target: Option<MountTarget>,
	shared: Arc<Mutex<Shared>>,
}

impl std::fmt::Debug for Session {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "Session" )
			.field( "id", &self.id )
			.field( "torn_down", &self.context.is_none() )
			.field( "mount_target", &self.mount_target )
			.finish_non_exhaustive()
	}
}

impl Session {

	/// Creates a context in `module` and, if given, seeds it with `existing`.
	///
	/// # Errors
	/// Fails if the module cannot create the context or rejects the seed data. The
	/// context is released before the error is returned.
	pub fn open( module: &CompiledModule, existing: Option<&SerializedDocument> ) -> Result<Self, SessionError> {

		let id = SessionId::next();
		let shared = Arc::new( Mutex::new( Shared { state: InteractionState::default(), observer: None }));
		let mut session = Self { id, context: Some( module.create_context()? ), mount_target: None, shared };

		session.init( existing )?;
		info!( session = %id, seeded = existing.is_some(), "session opened" );
		Ok( session )

	}

	/// Like [`open`]( Self::open ) but without waiting for the module.
	///
	/// # Errors
	/// [`LinkerError::ModuleNotReady`] if the linker has not finished loading.
	pub fn try_open( linker: &ModuleLinker, existing: Option<&SerializedDocument> ) -> Result<Self, SessionError> {
		Self::open( &linker.try_module()?, existing )
	}

	fn init( &mut self, existing: Option<&SerializedDocument> ) -> Result<(), SessionError> {

		let weak = Arc::downgrade( &self.shared );
		let session = self.id ;
		let context = self.context_mut()?;

		context.on_state_changed( Box::new( move | state | forward_state( &weak, session, state )))?;
		if let Some( data ) = existing { context.set_data( data, true )?; }
		let state = context.get_state()?;

		self.shared.lock().map_err(|_| SessionError::LockRejected )?.state = state ;
		Ok(())

	}

	#[inline] pub fn id( &self ) -> SessionId { self.id }

	/// Whether [`teardown`]( Self::teardown ) has run.
	#[inline] pub fn is_torn_down( &self ) -> bool { self.context.is_none() }

	/// The container this session renders into, if mounted.
	#[inline] pub fn mount_target( &self ) -> Option<MountTarget> { self.mount_target }

	/// The last state the context reported.
	///
	/// # Errors
	/// The shared state is poisoned.
	pub fn interaction_state( &self ) -> Result<InteractionState, SessionError> {
		Ok( self.shared.lock().map_err(|_| SessionError::LockRejected )?.state )
	}

	fn context_mut( &mut self ) -> Result<&mut Box<dyn ComputeContext>, SessionError> {
		let id = self.id ;
		self.context.as_mut().ok_or( SessionError::Lifecycle( SessionLifecycleError::AlreadyTornDown( id )))
	}

	/// # Errors
	/// The session is torn down or the context failed.
	pub fn get_data( &mut self ) -> Result<SerializedDocument, SessionError> {
		Ok( self.context_mut()?.get_data()? )
	}

	/// `clear_first` discards in-memory editing state before loading.
	///
	/// # Errors
	/// The session is torn down or the context failed.
	pub fn set_data( &mut self, data: &SerializedDocument, clear_first: bool ) -> Result<(), SessionError> {
		debug!( session = %self.id, clear_first, bytes = data.as_str().len(), "setting document data" );
		Ok( self.context_mut()?.set_data( data, clear_first )? )
	}

	/// # Errors
	/// The session is torn down or the context failed.
	pub fn clear( &mut self ) -> Result<(), SessionError> {
		Ok( self.context_mut()?.clear()? )
	}

	/// Renders the document into `target`. Allowed once per session.
	///
	/// # Errors
	/// [`SessionError::AlreadyMounted`] on a second call; the first target is kept.
	pub fn mount( &mut self, target: MountTarget ) -> Result<(), SessionError> {
		if let Some( current ) = self.mount_target {
			return Err( SessionError::AlreadyMounted( current.container ));
		}
		self.context_mut()?.mount( target.container )?;
		self.mount_target = Some( target );
		debug!( session = %self.id, container = %target.container, "session mounted" );
		Ok(())
	}

	/// Requests the opposite of the context's current `edit` flag.
	///
	/// The mirror is not touched here; it follows the context's notification, which
	/// may arrive during this call, later, or never if the context refuses.
	///
	/// # Errors
	/// The session is torn down or the context failed.
	pub fn toggle_edit( &mut self ) -> Result<(), SessionError> {
		let context = self.context_mut()?;
		let requested = context.get_state()?.toggled();
		context.set_state( requested )?;
		debug!( session = %self.id, edit = requested.edit, "requested interaction state" );
		Ok(())
	}

	/// Installs the session's one state observer.
	///
	/// # Errors
	/// [`SessionError::ObserverAlreadyRegistered`] if an observer is installed.
	pub fn on_state_changed( &mut self, observer: impl FnMut( InteractionState ) + Send + 'static ) -> Result<(), SessionError> {
		if self.is_torn_down() { return Err( SessionLifecycleError::AlreadyTornDown( self.id ).into() ); }
		let mut shared = self.shared.lock().map_err(|_| SessionError::LockRejected )?;
		if shared.observer.is_some() { return Err( SessionError::ObserverAlreadyRegistered ); }
		shared.observer = Some( Box::new( observer ));
		Ok(())
	}

	/// Unregisters every listener and releases the context.
	///
	/// # Errors
	/// [`SessionLifecycleError::AlreadyTornDown`] on a second call. If the module
	/// fails to release the context, the session is still considered torn down.
	pub fn teardown( &mut self ) -> Result<(), SessionError> {

		let mut context = self.context.take().ok_or( SessionLifecycleError::AlreadyTornDown( self.id ))?;

		if let Ok( mut shared ) = self.shared.lock() { shared.observer = None ; }
		context.remove_state_listener();
		let released = context.release();
		self.mount_target = None ;

		info!( session = %self.id, "session torn down" );
		Ok( released? )

	}

}

impl Drop for Session {
	fn drop( &mut self ) {
		if !self.is_torn_down() {
			if let Err( err ) = self.teardown() {
				warn!( session = %self.id, %err, "failed to tear down dropped session" );
			}
		}
	}
}

fn forward_state( shared: &Weak<Mutex<Shared>>, session: SessionId, state: InteractionState ) {
	let Some( shared ) = shared.upgrade() else {
		debug!( %session, "state change for a dropped session" );
		return ;
	};
	match shared.lock() {
		Ok( mut shared ) => shared.apply( state ),
		Err( _ ) => warn!( %session, "session state poisoned, state change dropped" ),
	};
}
