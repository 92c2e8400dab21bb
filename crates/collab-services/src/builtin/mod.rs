//! Built-in services shipped with the server.

pub mod public_roles;
pub mod word_guess;

pub use public_roles::PublicRoles;
pub use word_guess::WordGuess;
