//! Example line protocols.
//!
//! - `echo`: echoes every line back (event-driven handler)
//! - `counter`: replies with the received number plus one (iterate-until-error
//!   handler)

pub mod counter;
pub mod echo;
