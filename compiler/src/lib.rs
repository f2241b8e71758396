// ugc — UGen Graph Compiler
//
// Library root. Core engine (rate, ge, catalog, expand, dedup, graph, codec)
// first, then the .ugs front end and the compiler pipeline.

pub mod ast;
pub mod catalog;
pub mod codec;
pub mod dedup;
pub mod diag;
pub mod dot;
pub mod expand;
pub mod ge;
pub mod graph;
pub mod id;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod rate;
