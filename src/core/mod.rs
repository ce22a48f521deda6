// Pure session-state management, deliberately free of any DTLS or socket
// wiring (that lives in `net`): business state vs. network plumbing.

pub mod session;

pub use session::{Session, SessionTable};
