use tracing::{debug, warn};

use crate::element::{Constant, MethodIdentifier};
use crate::ir::{Class, ConstEntry, MemberRef, Method};
use crate::opcodes;
use crate::signature::{OBJECT, canonical, parse_method_type, parse_type};

/// Normalized instruction consumed by the simulator. Tags the simulator does
/// not interpret carry only their stack effect.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Ins {
    Push(Constant),
    Load {
        slot: usize,
        type_name: String,
    },
    Store {
        slot: usize,
        type_name: String,
    },
    GetField {
        field: MemberRef,
        type_name: String,
    },
    GetStatic {
        field: MemberRef,
        type_name: String,
    },
    New {
        type_name: String,
    },
    Dup,
    Invoke {
        id: MethodIdentifier,
        interface: bool,
    },
    InvokeDynamic {
        /// Implementation method resolved from the bootstrap arguments.
        target: Option<MethodIdentifier>,
        /// Functional interface type produced at the call site.
        handle_type: String,
        /// Number of captured values popped from the stack.
        captures: usize,
    },
    SizeChange {
        pops: usize,
        pushes: usize,
    },
    Return,
    Throw,
    Other,
}

/// Decode a method body into a normalized instruction stream in program
/// order. Jumps and exception tables are flattened away: the simulator runs
/// a linear sweep and merges branch effects on the shared slots.
pub(crate) fn decode_method(class: &Class, method: &Method) -> Vec<Ins> {
    let code = &method.bytecode;
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let Some(length) = opcode_length(code, offset) else {
            warn!(
                "undecodable instruction 0x{opcode:02x} at offset {offset} in {}.{}; truncating",
                class.name, method.name
            );
            break;
        };
        if length == 0 || offset + length > code.len() {
            warn!(
                "invalid instruction length at offset {offset} in {}.{}; truncating",
                class.name, method.name
            );
            break;
        }
        instructions.push(decode_one(class, method, code, offset, opcode));
        offset += length;
    }
    instructions
}

fn decode_one(class: &Class, method: &Method, code: &[u8], offset: usize, opcode: u8) -> Ins {
    match opcode {
        opcodes::NOP => Ins::Other,
        opcodes::ACONST_NULL => Ins::Push(Constant::Null),
        opcodes::ICONST_M1..=opcodes::ICONST_5 => {
            Ins::Push(Constant::Int(opcode as i64 - opcodes::ICONST_0 as i64))
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => {
            Ins::Push(Constant::Int((opcode - opcodes::LCONST_0) as i64))
        }
        0x0b..=0x0d => Ins::Push(Constant::Bits(
            ((opcode - opcodes::FCONST_0) as f64).to_bits(),
        )),
        0x0e | 0x0f => Ins::Push(Constant::Bits(((opcode - opcodes::DCONST_0) as f64).to_bits())),
        opcodes::BIPUSH => Ins::Push(Constant::Int(code[offset + 1] as i8 as i64)),
        opcodes::SIPUSH => Ins::Push(Constant::Int(
            i16::from_be_bytes([code[offset + 1], code[offset + 2]]) as i64,
        )),
        opcodes::LDC => load_constant(class, code[offset + 1] as u16),
        opcodes::LDC_W | opcodes::LDC2_W => {
            load_constant(class, u16::from_be_bytes([code[offset + 1], code[offset + 2]]))
        }
        opcodes::ILOAD..=opcodes::ALOAD => {
            load_slot(method, code[offset + 1] as usize, opcode - opcodes::ILOAD)
        }
        0x1a..=0x29 => {
            let relative = opcode - 0x1a;
            load_slot(method, (relative % 4) as usize, relative / 4)
        }
        opcodes::ALOAD_0..=opcodes::ALOAD_3 => Ins::Load {
            slot: (opcode - opcodes::ALOAD_0) as usize,
            type_name: local_type(method, (opcode - opcodes::ALOAD_0) as usize),
        },
        // Array loads.
        0x2e..=0x35 => Ins::SizeChange { pops: 2, pushes: 1 },
        opcodes::ISTORE..=opcodes::ASTORE => {
            store_slot(method, code[offset + 1] as usize, opcode - opcodes::ISTORE)
        }
        0x3b..=0x4a => {
            let relative = opcode - 0x3b;
            store_slot(method, (relative % 4) as usize, relative / 4)
        }
        opcodes::ASTORE_0..=opcodes::ASTORE_3 => Ins::Store {
            slot: (opcode - opcodes::ASTORE_0) as usize,
            type_name: local_type(method, (opcode - opcodes::ASTORE_0) as usize),
        },
        // Array stores.
        0x4f..=0x56 => Ins::SizeChange { pops: 3, pushes: 0 },
        opcodes::POP => Ins::SizeChange { pops: 1, pushes: 0 },
        opcodes::POP2 => Ins::SizeChange { pops: 2, pushes: 0 },
        // The dup_x and dup2 forms approximate to a plain dup; the REST
        // idioms the simulator cares about only use dup on builder chains.
        opcodes::DUP | opcodes::DUP_X1 | opcodes::DUP_X2 | opcodes::DUP2 | 0x5d | 0x5e => Ins::Dup,
        opcodes::SWAP => Ins::SizeChange { pops: 2, pushes: 2 },
        // Arithmetic and comparison.
        0x60..=0x73 | 0x78..=0x83 | 0x94..=0x98 => Ins::SizeChange { pops: 2, pushes: 1 },
        0x74..=0x77 | 0x85..=0x93 => Ins::SizeChange { pops: 1, pushes: 1 },
        opcodes::IINC => Ins::Other,
        opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
            Ins::SizeChange { pops: 1, pushes: 0 }
        }
        opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => Ins::SizeChange { pops: 2, pushes: 0 },
        opcodes::GOTO | opcodes::GOTO_W | opcodes::RET => Ins::Other,
        opcodes::JSR | opcodes::JSR_W => Ins::SizeChange { pops: 0, pushes: 1 },
        opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => Ins::SizeChange { pops: 1, pushes: 0 },
        opcodes::IRETURN..=opcodes::ARETURN => Ins::Return,
        opcodes::RETURN => Ins::SizeChange { pops: 0, pushes: 0 },
        opcodes::GETSTATIC => field_access(class, code, offset, true),
        opcodes::PUTSTATIC => Ins::SizeChange { pops: 1, pushes: 0 },
        opcodes::GETFIELD => field_access(class, code, offset, false),
        opcodes::PUTFIELD => Ins::SizeChange { pops: 2, pushes: 0 },
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC
        | opcodes::INVOKEINTERFACE => invoke(class, code, offset, opcode),
        opcodes::INVOKEDYNAMIC => invoke_dynamic(class, code, offset),
        opcodes::NEW => match class.constants.get(read_u16(code, offset + 1)) {
            ConstEntry::ClassRef(name) => Ins::New {
                type_name: name.clone(),
            },
            _ => Ins::SizeChange { pops: 0, pushes: 1 },
        },
        opcodes::NEWARRAY | opcodes::ANEWARRAY => Ins::SizeChange { pops: 1, pushes: 1 },
        opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => Ins::SizeChange { pops: 1, pushes: 1 },
        opcodes::ATHROW => Ins::Throw,
        // checkcast keeps the element; the cast target is a refinement the
        // merge recovers anyway.
        opcodes::CHECKCAST => Ins::Other,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => Ins::SizeChange { pops: 1, pushes: 0 },
        opcodes::WIDE => decode_wide(method, code, offset),
        opcodes::MULTIANEWARRAY => Ins::SizeChange {
            pops: code.get(offset + 3).copied().unwrap_or(1) as usize,
            pushes: 1,
        },
        _ => Ins::Other,
    }
}

fn load_constant(class: &Class, index: u16) -> Ins {
    match class.constants.get(index) {
        ConstEntry::Int(value) => Ins::Push(Constant::Int(*value as i64)),
        ConstEntry::Long(value) => Ins::Push(Constant::Int(*value)),
        ConstEntry::Float(value) => Ins::Push(Constant::Bits((*value as f64).to_bits())),
        ConstEntry::Double(value) => Ins::Push(Constant::Bits(value.to_bits())),
        ConstEntry::Str(value) => Ins::Push(Constant::Str(value.clone())),
        // Class literals and method types carry no REST-relevant constant.
        _ => Ins::SizeChange { pops: 0, pushes: 1 },
    }
}

fn load_slot(method: &Method, slot: usize, kind: u8) -> Ins {
    Ins::Load {
        slot,
        type_name: primitive_slot_type(method, slot, kind),
    }
}

fn store_slot(method: &Method, slot: usize, kind: u8) -> Ins {
    Ins::Store {
        slot,
        type_name: primitive_slot_type(method, slot, kind),
    }
}

fn primitive_slot_type(method: &Method, slot: usize, kind: u8) -> String {
    match kind {
        0 => "int".to_string(),
        1 => "long".to_string(),
        2 => "float".to_string(),
        3 => "double".to_string(),
        _ => local_type(method, slot),
    }
}

fn local_type(method: &Method, slot: usize) -> String {
    method
        .local_types
        .get(&(slot as u16))
        .and_then(|descriptor| parse_type(descriptor).ok())
        .map(|parsed| parsed.name)
        .unwrap_or_else(|| OBJECT.to_string())
}

fn field_access(class: &Class, code: &[u8], offset: usize, is_static: bool) -> Ins {
    let index = read_u16(code, offset + 1);
    match class.constants.get(index) {
        ConstEntry::FieldRef(member) => {
            let type_name = parse_type(&member.descriptor)
                .map(|parsed| parsed.name)
                .unwrap_or_else(|_| OBJECT.to_string());
            if is_static {
                Ins::GetStatic {
                    field: member.clone(),
                    type_name,
                }
            } else {
                Ins::GetField {
                    field: member.clone(),
                    type_name,
                }
            }
        }
        _ => {
            debug!("unresolvable field reference at offset {offset} in {}", class.name);
            if is_static {
                Ins::SizeChange { pops: 0, pushes: 1 }
            } else {
                Ins::SizeChange { pops: 1, pushes: 1 }
            }
        }
    }
}

fn invoke(class: &Class, code: &[u8], offset: usize, opcode: u8) -> Ins {
    let index = read_u16(code, offset + 1);
    let ConstEntry::MethodRef { member, interface } = class.constants.get(index) else {
        debug!("unresolvable method reference at offset {offset} in {}", class.name);
        return Ins::Other;
    };
    let is_static = opcode == opcodes::INVOKESTATIC;
    match method_identifier(member, is_static) {
        Some(id) => Ins::Invoke {
            id,
            interface: *interface || opcode == opcodes::INVOKEINTERFACE,
        },
        None => Ins::Other,
    }
}

fn invoke_dynamic(class: &Class, code: &[u8], offset: usize) -> Ins {
    let index = read_u16(code, offset + 1);
    let ConstEntry::Dynamic {
        bootstrap_index,
        descriptor,
        ..
    } = class.constants.get(index)
    else {
        return Ins::Other;
    };
    let Ok((captures, produced)) = parse_method_type(descriptor) else {
        return Ins::Other;
    };
    let target = class
        .bootstrap_targets
        .get(*bootstrap_index as usize)
        .and_then(|target| target.as_ref())
        .and_then(|member| method_identifier(member, false));
    Ins::InvokeDynamic {
        target,
        handle_type: produced.name,
        captures: captures.len(),
    }
}

/// Build a structural method identifier from a constant pool member
/// reference. Static-ness for bootstrap targets is refined by the caller.
pub(crate) fn method_identifier(member: &MemberRef, is_static: bool) -> Option<MethodIdentifier> {
    let (parameters, return_type) = match parse_method_type(&member.descriptor) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(
                "malformed method descriptor {}.{}{}: {err:#}",
                member.owner, member.name, member.descriptor
            );
            return None;
        }
    };
    Some(MethodIdentifier {
        owner: canonical(&member.owner),
        name: member.name.clone(),
        parameters,
        return_type,
        is_static,
    })
}

fn read_u16(code: &[u8], offset: usize) -> u16 {
    match code.get(offset..offset + 2) {
        Some(slice) => u16::from_be_bytes([slice[0], slice[1]]),
        None => 0,
    }
}

fn opcode_length(code: &[u8], offset: usize) -> Option<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xaa => tableswitch_length(code, offset)?,
        0xab => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        0xb9 | 0xba => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => wide_length(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca => 1,
        0xfe | 0xff => 1,
        _ => return None,
    };
    Some(length)
}

fn decode_wide(method: &Method, code: &[u8], offset: usize) -> Ins {
    let Some(sub_opcode) = code.get(offset + 1).copied() else {
        return Ins::Other;
    };
    let slot = read_u16(code, offset + 2) as usize;
    match sub_opcode {
        opcodes::ILOAD..=opcodes::ALOAD => Ins::Load {
            slot,
            type_name: primitive_slot_type(method, slot, sub_opcode - opcodes::ILOAD),
        },
        opcodes::ISTORE..=opcodes::ASTORE => Ins::Store {
            slot,
            type_name: primitive_slot_type(method, slot, sub_opcode - opcodes::ISTORE),
        },
        _ => Ins::Other,
    }
}

fn tableswitch_length(code: &[u8], offset: usize) -> Option<usize> {
    let padding = switch_padding(offset);
    let base = offset + 1 + padding;
    let low = read_u32(code, base + 4)?;
    let high = read_u32(code, base + 8)?;
    let count = high.checked_sub(low)?.checked_add(1)?;
    Some(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Option<usize> {
    let padding = switch_padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_u32(code, base + 4)?;
    Some(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Option<usize> {
    let sub_opcode = code.get(offset + 1).copied()?;
    if sub_opcode == opcodes::IINC {
        Some(6)
    } else {
        Some(4)
    }
}

fn switch_padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u32(code: &[u8], offset: usize) -> Option<u32> {
    let slice = code.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ConstantTable;
    use std::collections::BTreeMap;

    fn empty_method(bytecode: Vec<u8>) -> Method {
        Method {
            name: "methodX".to_string(),
            descriptor: "()V".to_string(),
            signature: None,
            access: crate::ir::MethodAccess::default(),
            annotations: Vec::new(),
            parameter_annotations: Vec::new(),
            bytecode,
            local_types: BTreeMap::new(),
        }
    }

    fn class_with_constants(entries: Vec<ConstEntry>) -> Class {
        let mut class = Class::synthetic("com.example.Owner");
        class.constants = ConstantTable::new(entries);
        class
    }

    #[test]
    fn decodes_integer_constants_and_return() {
        let class = class_with_constants(Vec::new());
        let method = empty_method(vec![
            opcodes::SIPUSH,
            0x00,
            0xc9, // 201
            opcodes::ICONST_2,
            opcodes::ARETURN,
        ]);

        let instructions = decode_method(&class, &method);

        assert_eq!(
            instructions,
            vec![
                Ins::Push(Constant::Int(201)),
                Ins::Push(Constant::Int(2)),
                Ins::Return,
            ]
        );
    }

    #[test]
    fn decodes_ldc_string_from_pool() {
        let class = class_with_constants(vec![
            ConstEntry::Unused,
            ConstEntry::Str("application/json".to_string()),
        ]);
        let method = empty_method(vec![opcodes::LDC, 1, opcodes::ARETURN]);

        let instructions = decode_method(&class, &method);

        assert_eq!(
            instructions[0],
            Ins::Push(Constant::Str("application/json".to_string()))
        );
    }

    #[test]
    fn decodes_invoke_with_identifier() {
        let class = class_with_constants(vec![
            ConstEntry::Unused,
            ConstEntry::MethodRef {
                member: MemberRef {
                    owner: "jakarta.ws.rs.core.Response".to_string(),
                    name: "status".to_string(),
                    descriptor: "(I)Ljakarta/ws/rs/core/Response$ResponseBuilder;".to_string(),
                },
                interface: false,
            },
        ]);
        let method = empty_method(vec![opcodes::INVOKESTATIC, 0, 1]);

        let instructions = decode_method(&class, &method);

        let Ins::Invoke { id, .. } = &instructions[0] else {
            panic!("expected invoke, got {instructions:?}");
        };
        assert_eq!(id.owner, "jakarta.ws.rs.core.Response");
        assert_eq!(id.name, "status");
        assert!(id.is_static);
        assert_eq!(id.parameters.len(), 1);
        assert_eq!(id.return_type.name, "jakarta.ws.rs.core.Response$ResponseBuilder");
    }

    #[test]
    fn degrades_unresolvable_references() {
        let class = class_with_constants(Vec::new());
        let method = empty_method(vec![opcodes::INVOKEVIRTUAL, 0, 9]);

        let instructions = decode_method(&class, &method);

        assert_eq!(instructions, vec![Ins::Other]);
    }

    #[test]
    fn truncates_on_undecodable_opcode() {
        let class = class_with_constants(Vec::new());
        let method = empty_method(vec![opcodes::ICONST_0, 0xcb, opcodes::ICONST_1]);

        let instructions = decode_method(&class, &method);

        assert_eq!(instructions, vec![Ins::Push(Constant::Int(0))]);
    }

    #[test]
    fn decodes_branches_as_stack_effects() {
        let class = class_with_constants(Vec::new());
        let method = empty_method(vec![opcodes::ILOAD_0, opcodes::IFEQ, 0x00, 0x05]);

        let instructions = decode_method(&class, &method);

        assert_eq!(
            instructions,
            vec![
                Ins::Load {
                    slot: 0,
                    type_name: "int".to_string()
                },
                Ins::SizeChange { pops: 1, pushes: 0 },
            ]
        );
    }
}
