mod helpers;
mod middleware;
mod session;
mod token;

pub use helpers::{Authenticated, authenticate, load_principal};
pub use middleware::{AuthError, MaybePrincipal, RequirePrincipal};
pub use session::{Session, login, logout};
pub use token::{TokenGenerator, parse_token};
