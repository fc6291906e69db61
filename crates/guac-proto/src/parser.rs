//! Streaming instruction decoder.
//!
//! The parser is restartable across reads: it holds the partial state of the
//! current element between byte chunks, so callers may feed it whatever the
//! transport produces, one byte at a time if need be. Any grammar violation
//! poisons the parser; a poisoned parser rejects all further input, matching
//! the policy that parse errors are fatal to the offending connection.

use crate::error::ProtocolError;
use crate::{INSTRUCTION_MAX_ELEMENTS, INSTRUCTION_MAX_LENGTH};
use std::io::BufRead;

/// One decoded instruction: the opcode plus its arguments, all UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: String,
    pub args: Vec<String>,
}

impl Instruction {
    pub fn arg(&self, index: usize) -> &str {
        self.args.get(index).map(String::as_str).unwrap_or("")
    }

    /// Re-encodes the instruction in canonical wire form.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut push_element = |out: &mut Vec<u8>, value: &str| {
            out.extend_from_slice(value.chars().count().to_string().as_bytes());
            out.push(b'.');
            out.extend_from_slice(value.as_bytes());
        };
        push_element(&mut out, &self.opcode);
        for arg in &self.args {
            out.push(b',');
            push_element(&mut out, arg);
        }
        out.push(b';');
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating the decimal length prefix of the next element.
    Length,
    /// Consuming the element value; `remaining` code points are outstanding
    /// and `continuation` UTF-8 trailer bytes complete the current one.
    Value {
        remaining: usize,
        continuation: u8,
    },
    /// Value complete; the next byte must be `,` or `;`.
    Separator,
}

/// Restartable decoder for the instruction grammar.
pub struct Parser {
    state: State,
    length: usize,
    have_digits: bool,
    value: Vec<u8>,
    elements: Vec<String>,
    /// Bytes consumed for the instruction in progress, separators included.
    instruction_len: usize,
    poisoned: bool,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Length,
            length: 0,
            have_digits: false,
            value: Vec::new(),
            elements: Vec::new(),
            instruction_len: 0,
            poisoned: false,
        }
    }

    /// True when no partial instruction is buffered, i.e. EOF here is clean.
    pub fn is_idle(&self) -> bool {
        self.state == State::Length
            && !self.have_digits
            && self.elements.is_empty()
            && !self.poisoned
    }

    /// Consumes bytes from `data` until one instruction completes or the
    /// input is exhausted. Returns the number of bytes consumed and the
    /// completed instruction, if any.
    pub fn feed(&mut self, data: &[u8]) -> Result<(usize, Option<Instruction>), ProtocolError> {
        if self.poisoned {
            return Err(ProtocolError::BadRequest("parser previously failed"));
        }

        for (consumed, &byte) in data.iter().enumerate() {
            self.instruction_len += 1;
            if self.instruction_len > INSTRUCTION_MAX_LENGTH {
                self.poisoned = true;
                return Err(ProtocolError::Overrun {
                    limit: INSTRUCTION_MAX_LENGTH,
                });
            }

            match self.state {
                State::Length => match byte {
                    b'0'..=b'9' => {
                        self.length = self.length * 10 + usize::from(byte - b'0');
                        self.have_digits = true;
                        if self.length > INSTRUCTION_MAX_LENGTH {
                            self.poisoned = true;
                            return Err(ProtocolError::Overrun {
                                limit: INSTRUCTION_MAX_LENGTH,
                            });
                        }
                    }
                    b'.' if self.have_digits => {
                        self.state = if self.length == 0 {
                            State::Separator
                        } else {
                            State::Value {
                                remaining: self.length,
                                continuation: 0,
                            }
                        };
                    }
                    _ => return self.poison("expected element length"),
                },

                State::Value {
                    mut remaining,
                    mut continuation,
                } => {
                    if continuation > 0 {
                        if byte & 0xC0 != 0x80 {
                            return self.poison("invalid UTF-8 continuation byte");
                        }
                        continuation -= 1;
                    } else {
                        // Leading byte: classify and count one code point.
                        continuation = match byte {
                            0x00..=0x7F => 0,
                            0xC0..=0xDF => 1,
                            0xE0..=0xEF => 2,
                            0xF0..=0xF7 => 3,
                            _ => return self.poison("invalid UTF-8 leading byte"),
                        };
                        remaining -= 1;
                    }
                    self.value.push(byte);
                    self.state = if remaining == 0 && continuation == 0 {
                        State::Separator
                    } else {
                        State::Value {
                            remaining,
                            continuation,
                        }
                    };
                }

                State::Separator => {
                    if self.elements.len() >= INSTRUCTION_MAX_ELEMENTS {
                        return self.poison("too many elements");
                    }
                    let element = match String::from_utf8(std::mem::take(&mut self.value)) {
                        Ok(s) => s,
                        Err(_) => return self.poison("element is not valid UTF-8"),
                    };
                    self.elements.push(element);
                    self.length = 0;
                    self.have_digits = false;
                    match byte {
                        b',' => self.state = State::Length,
                        b';' => {
                            let mut elements = std::mem::take(&mut self.elements);
                            let opcode = elements.remove(0);
                            self.state = State::Length;
                            self.instruction_len = 0;
                            return Ok((
                                consumed + 1,
                                Some(Instruction {
                                    opcode,
                                    args: elements,
                                }),
                            ));
                        }
                        _ => return self.poison("expected ',' or ';'"),
                    }
                }
            }
        }

        Ok((data.len(), None))
    }

    /// Reads from a buffered source until one full instruction is decoded.
    /// Returns `Ok(None)` on a clean end-of-stream at an instruction
    /// boundary.
    pub fn read_instruction<R: BufRead>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Instruction>, ProtocolError> {
        loop {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                if self.is_idle() {
                    return Ok(None);
                }
                self.poisoned = true;
                return Err(ProtocolError::BadRequest("truncated instruction"));
            }
            let (consumed, instruction) = match self.feed(available) {
                Ok(result) => result,
                Err(e) => {
                    // Malformed input is not retriable; drop what we saw.
                    let len = available.len();
                    reader.consume(len);
                    return Err(e);
                }
            };
            reader.consume(consumed);
            if let Some(instruction) = instruction {
                return Ok(Some(instruction));
            }
        }
    }

    fn poison<T>(&mut self, reason: &'static str) -> Result<T, ProtocolError> {
        self.poisoned = true;
        Err(ProtocolError::BadRequest(reason))
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
