//! RESP2 wire protocol.
//!
//! - `types`: [`RespValue`], its encoding and the conversions from command
//!   replies, errors and subscription pushes
//! - `parser`: incremental decoding of request frames and inline commands
//!
//! ```ignore
//! use livekv::protocol::{parse_frame, RespValue};
//!
//! let (request, consumed) = parse_frame(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")?.unwrap();
//! let (name, args) = request.into_command().unwrap();
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_frame, ParseError, ParseResult};
pub use types::RespValue;
