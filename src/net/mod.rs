// Everything that touches an actual socket or the DTLS engine lives here,
// kept separate from the pure session bookkeeping in `core`.

pub mod dtls_conn;
pub mod listen;
pub mod router;

pub use router::PacketRouter;
