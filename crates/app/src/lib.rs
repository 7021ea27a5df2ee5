#![deny(unsafe_code)]

//! Terminal client wiring: settings, the session driver and the presenter.

pub mod driver;
pub mod error;
/// Layered client settings.
pub mod settings;
pub mod terminal;

pub use driver::{FinishedSave, InputCommand, InputOutcome, SessionDriver, run_session};
pub use error::{AppError, AppResult};
pub use settings::{ClientSettings, PresenterKind};
pub use terminal::TerminalPresenter;
