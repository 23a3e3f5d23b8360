//! The host panel lifecycle, mapped onto a session.
//!
//! A [`DocumentPanel`] is created by the host for every panel showing a LogicX
//! file. Its host-facing callbacks never fail: anything that goes wrong is logged
//! and leaves the panel in a degraded but stable state, with the toggle disabled
//! and explaining why.

use std::sync::Arc ;
use tracing::{ debug, error, info, warn };

use crate::capability::{ MountTarget, SerializedDocument };
use crate::host::{ Host, VaultPath };
use crate::module_linker::{ ModuleLinker, ModuleStatus };
use crate::plugin::LOGICX_VIEW ;
use crate::session::{ Session, SessionError, SessionLifecycleError };
use crate::toggle::InteractionToggle ;



/// Where the panel is in its life.
#[derive( Copy, Clone, Debug, PartialEq, Eq, Hash )]
pub enum PanelState {
	/// Created by the host, not rendered yet.
	Unmounted,
	/// Rendered at least once.
	Mounted,
	/// Closed by the host. Terminal.
	Closed,
}

/// Whether the panel is usable.
#[derive( Clone, Debug, PartialEq, Eq )]
pub enum PanelStatus {
	Ready,
	/// Something failed; the message is what the toggle shows.
	Degraded( String ),
}

/// Adapter between one host panel and its session.
pub struct DocumentPanel {
	linker: Arc<ModuleLinker>,
	host: Arc<dyn Host>,
	toggle: InteractionToggle,
	state: PanelState,
	status: PanelStatus,
	session: Option<Session>,
	file: Option<VaultPath>,
	target: Option<MountTarget>,
	last_data: SerializedDocument,
}

impl std::fmt::Debug for DocumentPanel {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "DocumentPanel" )
			.field( "state", &self.state )
			.field( "status", &self.status )
			.field( "session", &self.session )
			.field( "file", &self.file )
			.field( "target", &self.target )
			.finish_non_exhaustive()
	}
}

impl DocumentPanel {

	pub fn new( linker: Arc<ModuleLinker>, host: Arc<dyn Host>, toggle: InteractionToggle ) -> Self {
		Self {
			linker,
			host,
			toggle,
			state: PanelState::Unmounted,
			status: PanelStatus::Ready,
			session: None,
			file: None,
			target: None,
			last_data: SerializedDocument::default(),
		}
	}

	#[inline] pub fn view_type( &self ) -> &'static str { LOGICX_VIEW }
	#[inline] pub fn state( &self ) -> PanelState { self.state }
	#[inline] pub fn status( &self ) -> &PanelStatus { &self.status }
	#[inline] pub fn file( &self ) -> Option<&VaultPath> { self.file.as_ref() }
	#[inline] pub fn session( &self ) -> Option<&Session> { self.session.as_ref() }
	#[inline] pub fn toggle( &self ) -> &InteractionToggle { &self.toggle }

	/// The host rendered the panel for the first time.
	///
	/// Waits for the compute module if it is still loading.
	pub async fn on_mount( &mut self, target: MountTarget ) {

		if self.state != PanelState::Unmounted {
			warn!( state = ?self.state, "ignoring mount of a panel that is not unmounted" );
			return ;
		}
		self.state = PanelState::Mounted ;

		let target = match target.is_block() {
			true => target,
			false => match self.host.create_child_container( &target ) {
				Ok( child ) => child,
				Err( err ) => return self.degrade( &err ),
			},
		};
		self.target = Some( target );

		if self.session.is_none() {
			match self.open_session( None ).await {
				Ok( session ) => self.session = Some( session ),
				Err( err ) => return self.degrade( &err ),
			}
		}

		if let Err( err ) = self.attach() { self.degrade( &err ) }

	}

	/// The host loaded `data` from `file` into this panel.
	///
	/// A different file than the one the current session is bound to replaces
	/// the session; a context never outlives its file.
	pub async fn set_view_data( &mut self, file: VaultPath, data: SerializedDocument, clear: bool ) {

		if self.state == PanelState::Closed {
			warn!( %file, "ignoring data for a closed panel" );
			return ;
		}
		self.last_data = data.clone();

		let bound = self.file.replace( file.clone() );
		if let Some( session ) = self.session.as_mut() {
			match bound {
				Some( bound ) if bound != file => {
					let violation = SessionLifecycleError::StaleSession { session: session.id(), bound, requested: file };
					warn!( %violation, "replacing session" );
					if let Err( err ) = session.teardown() { warn!( %err, "failed to tear down replaced session" ); }
					self.session = None ;
				},
				_ => {
					match session.set_data( &data, clear ) {
						Ok(()) => self.recover(),
						Err( err ) => self.degrade( &err ),
					}
					return ;
				},
			}
		}

		match self.open_session( Some( &data )).await {
			Ok( session ) => self.session = Some( session ),
			Err( err ) => return self.degrade( &err ),
		}
		if self.state == PanelState::Mounted {
			if let Err( err ) = self.attach() { self.degrade( &err ) }
		}

	}

	/// The host wants the current document, usually to save it.
	///
	/// Falls back to the last document the panel knew about if the session can't answer.
	pub fn get_view_data( &mut self ) -> SerializedDocument {
		let Some( session ) = self.session.as_mut() else { return self.last_data.clone() };
		match session.get_data() {
			Ok( data ) => {
				self.last_data = data ;
				self.recover();
			},
			Err( err ) => self.degrade( &err ),
		}
		self.last_data.clone()
	}

	/// The host discards the panel's content.
	pub fn clear( &mut self ) {
		self.last_data = SerializedDocument::default();
		let Some( session ) = self.session.as_mut() else { return };
		match session.clear() {
			Ok(()) => self.recover(),
			Err( err ) => self.degrade( &err ),
		}
	}

	/// The user clicked the toggle.
	pub fn activate_toggle( &mut self ) {
		if let PanelStatus::Degraded( reason ) = &self.status {
			debug!( %reason, "ignoring toggle on a degraded panel" );
			return ;
		}
		let Some( session ) = self.session.as_mut() else {
			debug!( "ignoring toggle on a panel without session" );
			return ;
		};
		if let Err( err ) = self.toggle.activate( session ) { self.degrade( &err ); }
	}

	/// The host closed the panel. Later callbacks are ignored.
	pub fn on_close( &mut self ) {
		if self.state == PanelState::Closed { return }
		self.state = PanelState::Closed ;
		if let Some( mut session ) = self.session.take() {
			if let Err( err ) = session.teardown() { warn!( %err, "failed to tear down session on close" ); }
		}
		info!( file = ?self.file, "panel closed" );
	}

	async fn open_session( &self, data: Option<&SerializedDocument> ) -> Result<Session, SessionError> {
		if self.linker.status() == ModuleStatus::Pending {
			self.toggle.show_not_ready( "compute module is loading" );
		}
		let module = self.linker.load().await?;
		Session::open( &module, data )
	}

	fn attach( &mut self ) -> Result<(), SessionError> {
		let ( Some( session ), Some( target )) = ( self.session.as_mut(), self.target ) else { return Ok(()) };
		if session.mount_target().is_none() {
			session.mount( target )?;
		}
		match self.toggle.bind( session ) {
			// Already following this session.
			Err( SessionError::ObserverAlreadyRegistered ) => self.toggle.render( session.interaction_state()? ),
			result => result?,
		}
		self.status = PanelStatus::Ready ;
		Ok(())
	}

	/// Leaves the degraded status once the session answers again.
	fn recover( &mut self ) {
		if self.status == PanelStatus::Ready || self.session.is_none() { return }
		match self.state {
			PanelState::Mounted => if let Err( err ) = self.attach() { return self.degrade( &err ) },
			PanelState::Unmounted | PanelState::Closed => self.status = PanelStatus::Ready,
		}
		if self.status == PanelStatus::Ready { info!( file = ?self.file, "panel recovered" ); }
	}

	fn degrade( &mut self, err: &dyn std::fmt::Display ) {
		let reason = err.to_string();
		error!( file = ?self.file, %reason, "panel degraded" );
		self.toggle.show_not_ready( &reason );
		self.status = PanelStatus::Degraded( reason );
	}

}
