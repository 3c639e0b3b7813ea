//! Symbolic-expression serialization of IR entities.
//!
//! IR metadata travels as nested symbolic expressions: a head identifier
//! applied to an operand list, with atoms for numbers, strings, booleans,
//! and brace-delimited lists. The reader and printer are inverses; the
//! codecs on top are table-driven maps from head identifier to a decode
//! function, with symmetric encoders, so `decode(encode(x)) = x` for every
//! type reference, constant, method reference, and instruction prototype.

mod codec;
mod reader;

pub use codec::{
    decode_constant, decode_method_ref, decode_prototype, decode_type, encode_constant,
    encode_method_ref, encode_prototype, encode_type, DecodeError, TypeTable,
};
pub use reader::{parse, parse_all, print, ParseError, SExpr};
