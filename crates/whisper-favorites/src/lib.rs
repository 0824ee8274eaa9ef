//! Favorite locations kept in sync with the Weather Whisper API, plus the
//! client context that wires every component together.

pub mod context;
pub mod sync;
pub mod types;

pub use context::WhisperContext;
pub use sync::{FavoritesState, FavoritesSync, FAVORITES_CAPACITY};
pub use types::{FavoriteCandidate, FavoriteLocation};
