//! Navigation gate between the login surface and the game surface.
//!
//! A pure guard with no state of its own: it inspects the single
//! `logged_in` derivation of the session and redirects. Re-evaluate it on
//! every navigation attempt.

/// A navigable UI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// The login form.
    Login,
    /// Everything behind authentication (lobby, match, result).
    Game,
}

/// Resolve a navigation attempt against the current login state.
///
/// Navigating toward the login surface while logged in redirects to the
/// game surface; navigating toward the game surface while logged out
/// redirects to the login surface. Everything else passes through.
#[must_use]
pub fn resolve(requested: Surface, logged_in: bool) -> Surface {
    match (requested, logged_in) {
        (Surface::Login, true) => Surface::Game,
        (Surface::Game, false) => Surface::Login,
        (surface, _) => surface,
    }
}
