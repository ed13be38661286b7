use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::classpath::ClassIndex;
use crate::decode::{Ins, decode_method};
use crate::element::{Constant, Element, HttpResponse, MethodHandle, MethodIdentifier};
use crate::ir::{Class, Method};
use crate::pool::{Known, MethodPool, Summary, is_response_class, well_known_static};
use crate::signature::{OBJECT, TypeRef, is_wide, parse_method_type};

/// Recursion bound for interpreted callee simulation.
const DEPTH_CAP: usize = 32;

/// Stack and local slots share element identity so that a `DUP`ed value
/// observes later in-place aggregation (builder chains, constructors).
type Slot = Rc<RefCell<Element>>;

fn slot(element: Element) -> Slot {
    Rc::new(RefCell::new(element))
}

/// Abstract interpreter over a normalized instruction stream.
///
/// One simulator instance per worker; per-invocation state (stack, locals,
/// return element) lives in the frame, so recursive simulation of callees
/// is plain recursion bounded by the in-progress set and a depth cap.
pub(crate) struct Simulator<'a> {
    index: &'a ClassIndex,
    pool: &'a MethodPool,
    in_progress: HashSet<MethodIdentifier>,
    depth: usize,
}

struct Frame {
    stack: Vec<Slot>,
    locals: BTreeMap<usize, Slot>,
    return_element: Option<Element>,
    declared_return: TypeRef,
}

impl<'a> Simulator<'a> {
    pub(crate) fn new(index: &'a ClassIndex, pool: &'a MethodPool) -> Self {
        Self {
            index,
            pool,
            in_progress: HashSet::new(),
            depth: 0,
        }
    }

    /// Simulate a resource method body. Locals start from the declared
    /// parameter types (slot 0 carries the receiver for instance methods);
    /// the result is the merged return element, or `None` when no value
    /// flow reached a return.
    pub(crate) fn simulate_method(&mut self, class: &Class, method: &Method) -> Option<Element> {
        let signature = method.signature.as_deref().unwrap_or(&method.descriptor);
        let (parameters, declared_return) = match parse_method_type(signature) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(
                    "malformed signature on {}.{}: {err:#}; falling back to descriptor",
                    class.name, method.name
                );
                match parse_method_type(&method.descriptor) {
                    Ok(parsed) => parsed,
                    Err(_) => return None,
                }
            }
        };

        let receiver = if method.access.is_static {
            None
        } else {
            Some(Element::of_type(&class.name))
        };
        let arguments = parameters
            .iter()
            .map(|parameter| Element::of_type(&parameter.name))
            .collect();

        let instructions = decode_method(class, method);
        self.run(&instructions, receiver, arguments, &parameters, declared_return)
    }

    /// Simulate a decoded instruction stream with concrete receiver and
    /// argument elements, yielding the merged return element.
    fn run(
        &mut self,
        instructions: &[Ins],
        receiver: Option<Element>,
        arguments: Vec<Element>,
        parameters: &[TypeRef],
        declared_return: TypeRef,
    ) -> Option<Element> {
        let mut frame = Frame {
            stack: Vec::new(),
            locals: BTreeMap::new(),
            return_element: None,
            declared_return,
        };

        let mut next_slot = 0usize;
        if let Some(receiver) = receiver {
            frame.locals.insert(0, slot(receiver));
            next_slot = 1;
        }
        for (position, argument) in arguments.into_iter().enumerate() {
            frame.locals.insert(next_slot, slot(argument));
            let wide = parameters
                .get(position)
                .map(|parameter| is_wide(&parameter.name))
                .unwrap_or(false);
            next_slot += if wide { 2 } else { 1 };
        }

        for instruction in instructions {
            self.step(instruction, &mut frame);
        }

        frame.return_element
    }

    fn step(&mut self, instruction: &Ins, frame: &mut Frame) {
        match instruction {
            Ins::Push(constant) => frame.stack.push(slot(Element::constant(constant.clone()))),
            Ins::Load { slot: index, type_name } => {
                let value = frame
                    .locals
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| slot(Element::of_type(type_name)));
                frame.stack.push(value);
            }
            Ins::Store { slot: index, type_name } => {
                let popped = pop_element(frame);
                self.store(frame, *index, type_name, popped);
            }
            Ins::GetField { type_name, .. } => {
                frame.stack.pop();
                frame.stack.push(slot(Element::of_type(type_name)));
            }
            Ins::GetStatic { field, type_name } => {
                let element = well_known_static(field, type_name)
                    .unwrap_or_else(|| Element::of_type(type_name));
                frame.stack.push(slot(element));
            }
            Ins::New { type_name } => frame.stack.push(slot(Element::of_type(type_name))),
            Ins::Dup => {
                if let Some(top) = frame.stack.last() {
                    let shared = Rc::clone(top);
                    frame.stack.push(shared);
                }
            }
            Ins::Invoke { id, .. } => self.invoke(id, frame),
            Ins::InvokeDynamic {
                target,
                handle_type,
                captures,
            } => {
                let mut bound = Vec::new();
                for _ in 0..*captures {
                    bound.push(pop_element(frame));
                }
                bound.reverse();
                let element = match target {
                    Some(target) => Element::with_handle(
                        handle_type,
                        MethodHandle {
                            target: target.clone(),
                            bound_args: bound,
                        },
                    ),
                    None => Element::of_type(handle_type),
                };
                frame.stack.push(slot(element));
            }
            Ins::SizeChange { pops, pushes } => {
                for _ in 0..*pops {
                    frame.stack.pop();
                }
                for _ in 0..*pushes {
                    frame.stack.push(slot(Element::empty()));
                }
            }
            Ins::Return => {
                if !frame.stack.is_empty() {
                    let popped = pop_element(frame);
                    self.merge_return(frame, popped);
                }
                // Mirrors the fall-through into the throw handling: a
                // response left on the stack merges before the clear.
                self.merge_possible_response(frame);
                frame.stack.clear();
            }
            Ins::Throw => {
                self.merge_possible_response(frame);
                frame.stack.clear();
            }
            Ins::Other => {}
        }
    }

    fn store(&mut self, frame: &mut Frame, index: usize, declared: &str, element: Element) {
        // Method handles are stored as copies so a later overwrite cannot
        // rebind an already captured call.
        let stored = if element.handle.is_some() {
            element
        } else {
            let specific = self.index.more_specific(&element.type_name, declared);
            let specific = specific.to_string();
            element.with_type(&specific)
        };
        let merged = match frame.locals.remove(&index) {
            Some(existing) => existing.borrow().clone().merge(stored, self.index),
            None => stored,
        };
        frame.locals.insert(index, slot(merged));
    }

    fn invoke(&mut self, id: &MethodIdentifier, frame: &mut Frame) {
        let mut arguments = Vec::new();
        for _ in 0..id.parameters.len() {
            arguments.push(pop_slot(frame));
        }
        arguments.reverse();

        let receiver = if id.is_static {
            None
        } else {
            Some(pop_slot(frame))
        };

        // A captured callable on the receiver slot is invoked in place of
        // its functional-interface method.
        if let Some(receiver) = &receiver {
            let handle = receiver.borrow().handle.clone();
            if let Some(handle) = handle {
                let result = self.invoke_handle(&handle, &arguments);
                if let Some(result) = result {
                    frame.stack.push(slot(result));
                }
                return;
            }
        }

        let may_wait = self.in_progress.is_empty();
        let summary = self.pool.summary(id, self.index, may_wait);
        let result = self.apply_summary(&summary, id, receiver, &arguments);
        if let Some(result) = result {
            frame.stack.push(result);
        }
    }

    fn apply_summary(
        &mut self,
        summary: &Summary,
        id: &MethodIdentifier,
        receiver: Option<Slot>,
        arguments: &[Slot],
    ) -> Option<Slot> {
        match summary {
            Summary::Known(known) => self.apply_known(*known, id, receiver, arguments),
            Summary::Interpreted(instructions) => {
                let receiver = receiver.map(|r| r.borrow().clone());
                let arguments: Vec<Element> =
                    arguments.iter().map(|a| a.borrow().clone()).collect();
                self.interpret_callee(id, instructions, receiver, arguments)
                    .map(slot)
            }
            Summary::Opaque => {
                if id.return_type.name == "void" {
                    None
                } else {
                    Some(slot(Element::of_type(&id.return_type.name)))
                }
            }
        }
    }

    fn interpret_callee(
        &mut self,
        id: &MethodIdentifier,
        instructions: &std::sync::Arc<Vec<Ins>>,
        receiver: Option<Element>,
        arguments: Vec<Element>,
    ) -> Option<Element> {
        if self.in_progress.contains(id) {
            debug!("recursive call to {}.{}; returning empty element", id.owner, id.name);
            return conservative_result(id);
        }
        if self.depth >= DEPTH_CAP {
            warn!(
                "simulation depth cap reached at {}.{}; returning empty element",
                id.owner, id.name
            );
            return conservative_result(id);
        }

        self.in_progress.insert(id.clone());
        self.depth += 1;
        let result = self.run(
            instructions,
            receiver,
            arguments,
            &id.parameters,
            id.return_type.clone(),
        );
        self.depth -= 1;
        self.in_progress.remove(id);

        match result {
            Some(result) => Some(result),
            None => conservative_result(id),
        }
    }

    /// Invoking a captured callable behaves as invoking the bound target
    /// directly: the bound arguments prepend the call arguments.
    fn invoke_handle(&mut self, handle: &MethodHandle, arguments: &[Slot]) -> Option<Element> {
        let target = &handle.target;
        let may_wait = self.in_progress.is_empty();
        let summary = self.pool.summary(target, self.index, may_wait);
        let Summary::Interpreted(instructions) = summary else {
            if target.return_type.name == "void" {
                return None;
            }
            return Some(Element::of_type(&target.return_type.name));
        };

        let mut combined = handle.bound_args.clone();
        combined.extend(arguments.iter().map(|a| a.borrow().clone()));
        // The bound receiver (when present) occupies slot 0, exactly where
        // a non-static target expects it.
        let types: Vec<TypeRef> = combined
            .iter()
            .map(|element| TypeRef::named(&element.type_name))
            .collect();
        if self.in_progress.contains(target) {
            return conservative_result(target);
        }
        self.in_progress.insert(target.clone());
        self.depth += 1;
        let result = self.run(&instructions, None, combined, &types, target.return_type.clone());
        self.depth -= 1;
        self.in_progress.remove(target);
        result.or_else(|| conservative_result(target))
    }

    fn apply_known(
        &mut self,
        known: Known,
        id: &MethodIdentifier,
        receiver: Option<Slot>,
        arguments: &[Slot],
    ) -> Option<Slot> {
        match known {
            Known::CreateStatus => {
                let mut response = HttpResponse::default();
                if let Some(argument) = arguments.first() {
                    for value in &argument.borrow().values {
                        if let Some(code) = value.as_int() {
                            response.statuses.insert(code as u16);
                        }
                    }
                }
                Some(slot(Element::response(&id.return_type.name, response)))
            }
            Known::Create { status, entity } => {
                let mut response = HttpResponse::default();
                response.statuses.insert(status);
                if entity {
                    if let Some(argument) = arguments.first() {
                        add_entity_type(&mut response, &argument.borrow());
                    }
                }
                Some(slot(Element::response(&id.return_type.name, response)))
            }
            Known::BuilderEntity => {
                let receiver = receiver?;
                if let Some(argument) = arguments.first() {
                    let argument = argument.borrow().clone();
                    update_aggregates(&mut receiver.borrow_mut(), |aggregate| {
                        add_entity_type(aggregate, &argument);
                    });
                }
                Some(receiver)
            }
            Known::BuilderHeader => {
                let receiver = receiver?;
                if let Some(argument) = arguments.first() {
                    let names: Vec<String> = argument
                        .borrow()
                        .values
                        .iter()
                        .filter_map(|value| value.as_str().map(str::to_string))
                        .collect();
                    update_aggregates(&mut receiver.borrow_mut(), |aggregate| {
                        aggregate.headers.extend(names.iter().cloned());
                    });
                }
                Some(receiver)
            }
            Known::BuilderBuild => {
                let receiver = receiver?;
                receiver.borrow_mut().type_name = id.return_type.name.clone();
                Some(receiver)
            }
            Known::BuilderPassthrough => receiver,
            Known::StatusGetCode => {
                let receiver = receiver?;
                let mut element = Element::of_type("int");
                for value in &receiver.borrow().values {
                    if let Some(code) = value.as_int() {
                        element.add_value(Constant::Int(code));
                    }
                }
                Some(slot(element))
            }
            Known::WebApplicationInit => {
                if let Some(receiver) = receiver {
                    let status_arg = arguments.first().map(|argument| argument.borrow().clone());
                    apply_exception_response(&mut receiver.borrow_mut(), id, status_arg);
                }
                None
            }
            Known::Concat => {
                let receiver = receiver?;
                let argument = arguments.first().map(|argument| argument.borrow().clone());
                let concatenated = concat_values(&receiver.borrow(), argument.as_ref());
                if id.owner == "java.lang.String" {
                    let mut element = Element::of_type("java.lang.String");
                    for value in concatenated {
                        element.add_value(Constant::Str(value));
                    }
                    Some(slot(element))
                } else {
                    {
                        let mut element = receiver.borrow_mut();
                        element.values.clear();
                        for value in concatenated {
                            element.add_value(Constant::Str(value));
                        }
                    }
                    Some(receiver)
                }
            }
            Known::BuilderToString => {
                let receiver = receiver?;
                let mut element = Element::of_type("java.lang.String");
                for value in &receiver.borrow().values {
                    if let Some(text) = value.as_str() {
                        element.add_value(Constant::Str(text.to_string()));
                    }
                }
                Some(slot(element))
            }
            Known::ValueOf => {
                let mut element = Element::of_type("java.lang.String");
                if let Some(argument) = arguments.first() {
                    for value in &argument.borrow().values {
                        let rendered = match value {
                            Constant::Str(text) => text.clone(),
                            Constant::Int(number) => number.to_string(),
                            Constant::Bool(flag) => flag.to_string(),
                            Constant::Bits(bits) => f64::from_bits(*bits).to_string(),
                            Constant::Null => "null".to_string(),
                        };
                        element.add_value(Constant::Str(rendered));
                    }
                }
                Some(slot(element))
            }
        }
    }

    fn merge_return(&mut self, frame: &mut Frame, popped: Element) {
        let merged = match frame.return_element.take() {
            Some(existing) => popped.merge(existing, self.index),
            None => popped,
        };
        // When the lattice gave up, the declared return type of the
        // enclosing method is the better carrier.
        let merged = if merged.type_name == OBJECT
            && frame.declared_return.name != OBJECT
            && frame.declared_return.name != "void"
        {
            let declared = frame.declared_return.name.clone();
            merged.with_type(&declared)
        } else {
            merged
        };
        frame.return_element = Some(merged);
    }

    fn merge_possible_response(&mut self, frame: &mut Frame) {
        let Some(top) = frame.stack.last() else {
            return;
        };
        let top = top.borrow().clone();
        let carries_response = !top.responses.is_empty() || is_response_class(&top.type_name);
        if carries_response {
            self.merge_return(frame, top);
        }
    }
}

fn conservative_result(id: &MethodIdentifier) -> Option<Element> {
    if id.return_type.name == "void" {
        None
    } else {
        Some(Element::of_type(&id.return_type.name))
    }
}

fn pop_slot(frame: &mut Frame) -> Slot {
    frame
        .stack
        .pop()
        .unwrap_or_else(|| slot(Element::empty()))
}

fn pop_element(frame: &mut Frame) -> Element {
    let popped = pop_slot(frame);
    let element = popped.borrow().clone();
    element
}

/// Apply a mutation to every aggregate the element carries, creating a
/// fresh aggregate first when the chain has none yet.
fn update_aggregates(element: &mut Element, apply: impl Fn(&mut HttpResponse)) {
    if element.responses.is_empty() {
        element.responses.insert(HttpResponse::default());
    }
    let aggregates = std::mem::take(&mut element.responses);
    for mut aggregate in aggregates {
        apply(&mut aggregate);
        element.responses.insert(aggregate);
    }
}

fn add_entity_type(response: &mut HttpResponse, entity: &Element) {
    if entity.is_null_only() {
        return;
    }
    response.entity_types.insert(entity.type_name.clone());
}

fn apply_exception_response(
    receiver: &mut Element,
    id: &MethodIdentifier,
    status_arg: Option<Element>,
) {
    let first_param = id.parameters.first().map(|parameter| parameter.name.as_str());
    match first_param {
        Some("int") => {
            let codes: Vec<u16> = status_arg
                .iter()
                .flat_map(|argument| argument.values.iter())
                .filter_map(Constant::as_int)
                .map(|code| code as u16)
                .collect();
            update_aggregates(receiver, |aggregate| {
                if codes.is_empty() {
                    aggregate.statuses.insert(500);
                } else {
                    aggregate.statuses.extend(codes.iter().copied());
                }
            });
        }
        Some(name) if is_response_class(name) => {
            if let Some(argument) = status_arg {
                receiver.responses.extend(argument.responses);
            }
        }
        // The no-argument constructor maps to an internal server error.
        _ => {
            update_aggregates(receiver, |aggregate| {
                aggregate.statuses.insert(500);
            });
        }
    }
}

fn concat_values(receiver: &Element, argument: Option<&Element>) -> Vec<String> {
    let left: Vec<&str> = receiver.values.iter().filter_map(Constant::as_str).collect();
    let right: Vec<String> = argument
        .map(|argument| {
            argument
                .values
                .iter()
                .filter_map(|value| match value {
                    Constant::Str(text) => Some(text.clone()),
                    Constant::Int(number) => Some(number.to_string()),
                    Constant::Bool(flag) => Some(flag.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    if left.is_empty() || right.is_empty() {
        return Vec::new();
    }
    let mut combined = Vec::new();
    for prefix in &left {
        for suffix in &right {
            combined.push(format!("{prefix}{suffix}"));
        }
    }
    combined
}
