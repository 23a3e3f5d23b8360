//! The edit/play button.
//!
//! The toggle keeps no state of its own. It renders whatever the session last
//! reported and turns clicks into requests; the icon only changes when the
//! context confirms a new state.

use std::sync::{ Arc, Mutex };
use tracing::warn ;

use crate::capability::InteractionState ;
use crate::session::{ Session, SessionError };



/// The icon shown on the toggle.
#[derive( Copy, Clone, Debug, PartialEq, Eq, Hash )]
pub enum Icon {
	/// Shown while editing.
	Pencil,
	/// Shown while running.
	Play,
}

impl Icon {
	pub fn for_state( state: InteractionState ) -> Self {
		match state.edit {
			true => Self::Pencil,
			false => Self::Play,
		}
	}

	/// The host's icon name.
	pub fn name( self ) -> &'static str {
		match self {
			Self::Pencil => "pencil",
			Self::Play => "play",
		}
	}
}

impl std::fmt::Display for Icon {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result { f.write_str( self.name() )}
}

/// The host button the toggle drives.
pub trait ToggleButton: Send {
	fn set_icon( &mut self, icon: Icon );
	fn set_disabled( &mut self, disabled: bool );
	fn set_tooltip( &mut self, tooltip: &str );
}

/// A thin reflection of a session's interaction state.
///
/// Clones share the same button.
#[derive( Clone )]
pub struct InteractionToggle {
	button: Arc<Mutex<Box<dyn ToggleButton>>>,
}

impl std::fmt::Debug for InteractionToggle {
	fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
		f.debug_struct( "InteractionToggle" ).finish_non_exhaustive()
	}
}

impl InteractionToggle {

	pub fn new( button: impl ToggleButton + 'static ) -> Self {
		Self { button: Arc::new( Mutex::new( Box::new( button )))}
	}

	fn with_button( &self, update: impl FnOnce( &mut dyn ToggleButton )) {
		match self.button.lock() {
			Ok( mut button ) => update( &mut **button ),
			Err( _ ) => warn!( "toggle button poisoned, update dropped" ),
		}
	}

	/// Shows `state` and enables the button.
	pub fn render( &self, state: InteractionState ) {
		self.with_button(| button | {
			button.set_icon( Icon::for_state( state ));
			button.set_tooltip( match state.edit {
				true => "Switch to run mode",
				false => "Switch to edit mode",
			});
			button.set_disabled( false );
		});
	}

	/// Disables the button and explains why.
	pub fn show_not_ready( &self, reason: &str ) {
		self.with_button(| button | {
			button.set_disabled( true );
			button.set_tooltip( &format!( "LogicX is not ready: {}", reason ));
		});
	}

	/// Renders the session's current state and follows every later change.
	///
	/// # Errors
	/// The session already has an observer or is torn down.
	pub fn bind( &self, session: &mut Session ) -> Result<(), SessionError> {
		let toggle = self.clone();
		session.on_state_changed( move | state | toggle.render( state ))?;
		self.render( session.interaction_state()? );
		Ok(())
	}

	/// Handles a click.
	///
	/// # Errors
	/// Propagates the session's failure to issue the request.
	pub fn activate( &self, session: &mut Session ) -> Result<(), SessionError> {
		session.toggle_edit()
	}

}
