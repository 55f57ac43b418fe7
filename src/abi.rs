//! Runtime ABI handling.
//!
//! An ABI maps named action and table types to binary layouts. This
//! module holds the ABI document model, the binary decoder with its two
//! backends, the per-contract height-indexed cache and the worker pool
//! decoding state-history payloads off the hot path.

mod cache;
mod decode;
mod pool;
mod types;

pub use cache::AbiCache;
pub use decode::decode_packed_abi;
pub use decode::name_to_string;
pub use decode::string_to_name;
pub use decode::AbiDecoder;
pub use decode::ByteReader;
pub use pool::DeserializerPool;
pub use types::AbiDef;
pub use types::ActionDef;
pub use types::FieldDef;
pub use types::StructDef;
pub use types::TableDef;
pub use types::TypeDef;
pub use types::VariantDef;
