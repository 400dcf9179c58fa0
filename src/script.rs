//! Script bundles and their compilation.
//!
//! A bundle is a TOML document:
//!
//! ```toml
//! [[event]]
//! name = "ping"
//! size = 0
//!
//! [[constant]]
//! name = "SPEED"
//! value = 200
//!
//! [[node]]
//! name = "thymio-II"
//! code = """
//! var counter
//! onevent ping
//!     emit bump
//! """
//! ```
//!
//! Compilation is pluggable through [`ScriptCompiler`]. The built-in
//! [`DeclarationCompiler`] checks declarations and event references, lays
//! out script variables after the node's native ones and emits an event
//! vector table followed by one block per handler.

use crate::constants::BYTECODE_CHUNK_WORDS;
use crate::descriptions::{
    CommonDefinitions, EventDefinition, NodeDescription, UserVariables, VariableSlot,
};
use crate::error::{CompileError, LoadError};
use crate::wire::message::{EventId, NamedConstant, NodeId, WireMessage};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct NodeScript {
    pub name: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptBundle {
    #[serde(default, rename = "event")]
    pub events: Vec<EventDefinition>,
    #[serde(default, rename = "constant")]
    pub constants: Vec<NamedConstant>,
    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeScript>,
}

impl ScriptBundle {
    pub fn parse(src: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(src)?)
    }

    pub fn definitions(&self) -> CommonDefinitions {
        CommonDefinitions {
            events: self.events.clone(),
            constants: self.constants.clone(),
        }
    }

    /// Source for the node called `node_name`. A bundle with a single script
    /// applies it to whatever node it is loaded on.
    pub fn script_for(&self, node_name: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.name == node_name)
            .or_else(|| match self.nodes.as_slice() {
                [only] => Some(only),
                _ => None,
            })
            .map(|n| n.code.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledScript {
    pub bytecode: Vec<u16>,
    pub variables: UserVariables,
}

pub trait ScriptCompiler: Send + Sync {
    fn compile(
        &self,
        source: &str,
        target: &NodeDescription,
        definitions: &CommonDefinitions,
    ) -> Result<CompiledScript, CompileError>;
}

/// Split bytecode into wire chunks.
pub fn bytecode_chunks(dest: NodeId, bytecode: &[u16]) -> Vec<WireMessage> {
    bytecode
        .chunks(BYTECODE_CHUNK_WORDS)
        .enumerate()
        .map(|(i, words)| WireMessage::BytecodeChunk {
            dest,
            start: (i * BYTECODE_CHUNK_WORDS) as u16,
            words: words.to_vec(),
        })
        .collect()
}

const OP_STOP: u16 = 0x0000;
const OP_EMIT: u16 = 0xb000;
/// Vector table id of the code run at startup.
const INIT_VECTOR: EventId = 0xffff;

#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationCompiler;

struct Handler {
    event: EventId,
    emits: Vec<EventId>,
}

impl DeclarationCompiler {
    fn error(target: &NodeDescription, line: usize, message: impl Into<String>) -> CompileError {
        CompileError {
            node: target.name.clone(),
            line,
            message: message.into(),
        }
    }

    fn parse_size(
        size_expr: &str,
        target: &NodeDescription,
        defs: &CommonDefinitions,
        line: usize,
    ) -> Result<u16, CompileError> {
        let size_expr = size_expr.trim();
        let size = match size_expr.parse::<i32>() {
            Ok(n) => n,
            Err(_) => defs
                .constant(size_expr)
                .or_else(|| {
                    target
                        .native_constants
                        .iter()
                        .find(|c| c.name == size_expr)
                        .map(|c| c.value)
                })
                .map(i32::from)
                .ok_or_else(|| Self::error(target, line, format!("unknown constant '{}'", size_expr)))?,
        };
        if size <= 0 || size > i32::from(u16::MAX) {
            return Err(Self::error(target, line, format!("invalid array size {}", size)));
        }
        Ok(size as u16)
    }

    fn event_id(
        name: &str,
        target: &NodeDescription,
        defs: &CommonDefinitions,
        line: usize,
    ) -> Result<EventId, CompileError> {
        defs.event_id(name)
            .or_else(|| target.local_event_id(name))
            .ok_or_else(|| Self::error(target, line, format!("unknown event '{}'", name)))
    }

    fn assemble(handlers: &[Handler]) -> Vec<u16> {
        let table_len = 1 + 2 * handlers.len();
        let mut table = vec![table_len as u16];
        let mut body = Vec::new();
        for h in handlers {
            table.push(h.event);
            table.push((table_len + body.len()) as u16);
            for e in &h.emits {
                body.push(OP_EMIT);
                body.push(*e);
            }
            body.push(OP_STOP);
        }
        table.extend(body);
        table
    }
}

impl ScriptCompiler for DeclarationCompiler {
    fn compile(
        &self,
        source: &str,
        target: &NodeDescription,
        defs: &CommonDefinitions,
    ) -> Result<CompiledScript, CompileError> {
        let mut variables: BTreeMap<String, VariableSlot> = BTreeMap::new();
        let mut next_free = target.native_end();
        let mut handlers = vec![Handler {
            event: INIT_VECTOR,
            emits: Vec::new(),
        }];

        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let text = raw.split('#').next().unwrap_or("").trim();
            let mut words = text.split_whitespace();
            match words.next() {
                Some("var") => {
                    let decl: String = words.collect::<Vec<_>>().join(" ");
                    let decl = decl.split('=').next().unwrap_or("").trim();
                    let (name, length) = match decl.split_once('[') {
                        Some((name, rest)) => {
                            let size = rest.strip_suffix(']').ok_or_else(|| {
                                Self::error(target, line, "missing ']' in array declaration")
                            })?;
                            (name.trim(), Self::parse_size(size, target, defs, line)?)
                        }
                        None => (decl, 1),
                    };
                    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
                        return Err(Self::error(target, line, format!("invalid variable name '{}'", name)));
                    }
                    if variables.contains_key(name) || target.variable(name).is_some() {
                        return Err(Self::error(target, line, format!("variable '{}' is already defined", name)));
                    }
                    let end = u32::from(next_free) + u32::from(length);
                    if end > u32::from(target.variables_size) {
                        return Err(Self::error(
                            target,
                            line,
                            format!("not enough variable memory for '{}'", name),
                        ));
                    }
                    variables.insert(
                        name.to_string(),
                        VariableSlot {
                            name: name.to_string(),
                            address: next_free,
                            length,
                        },
                    );
                    next_free = end as u16;
                }
                Some("onevent") => {
                    let name = words
                        .next()
                        .ok_or_else(|| Self::error(target, line, "missing event name after 'onevent'"))?;
                    let event = Self::event_id(name, target, defs, line)?;
                    if handlers.iter().any(|h| h.event == event) {
                        return Err(Self::error(target, line, format!("event '{}' is already handled", name)));
                    }
                    handlers.push(Handler {
                        event,
                        emits: Vec::new(),
                    });
                }
                Some("emit") => {
                    let name = words
                        .next()
                        .ok_or_else(|| Self::error(target, line, "missing event name after 'emit'"))?;
                    let event = defs
                        .event_id(name)
                        .ok_or_else(|| Self::error(target, line, format!("unknown event '{}'", name)))?;
                    if let Some(current) = handlers.last_mut() {
                        current.emits.push(event);
                    }
                }
                _ => {}
            }
        }

        let bytecode = Self::assemble(&handlers);
        if bytecode.len() > usize::from(target.bytecode_size) {
            return Err(Self::error(
                target,
                source.lines().count(),
                format!(
                    "script needs {} words of bytecode, node has {}",
                    bytecode.len(),
                    target.bytecode_size
                ),
            ));
        }
        Ok(CompiledScript {
            bytecode,
            variables,
        })
    }
}
