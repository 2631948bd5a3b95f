#![doc = include_str!("../README.md")]

pub use crate::config::{CodecSettings, JsonSettings};
pub use crate::error::Error;
pub use crate::json::{from_json_str, to_json_string, JsonStreamReader, JsonStreamWriter};
pub use crate::reader::{framed, BinaryReader, EnvelopeDecoder};
pub use crate::serializer::FudgeSerializer;
pub use crate::stream::{
    pipe, MessagePipe, PipeControl, StreamEvent, StreamReader, StreamWriter,
};
pub use crate::taxonomy::{MapTaxonomy, MapTaxonomyResolver, Taxonomy, TaxonomyResolver};
pub use crate::tree::{decode, encode, TreeReader, TreeWriter};
pub use crate::types::{Accuracy, DateTime, Field, Message, Value, WireType};
pub use crate::wire::{EnvelopeHeader, FieldPrefix, TypeDictionary};
pub use crate::writer::BinaryWriter;

pub mod config;
pub mod error;
pub mod json;
pub mod reader;
pub mod serializer;
pub mod stream;
pub mod taxonomy;
pub mod tree;
pub mod types;
pub mod wire;
pub mod writer;
