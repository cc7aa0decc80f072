//! Instruction builder. Tracks the insertion block and allocates values.

use crate::compiler::ir::*;
use isogen_core::decl::VarId;
use isogen_core::types::{BuiltinType, MetatypeRepr, ProtocolConformanceRef, SubstitutionMap, Type};

#[derive(Debug)]
pub struct IrBuilder {
    func: IrFunction,
    insertion: Option<BlockId>,
}

impl IrBuilder {
    /// Start a function with an empty entry block as the insertion point.
    pub fn new(name: &str, is_async: bool) -> Self {
        let mut builder = Self {
            func: IrFunction::new(name, is_async),
            insertion: None,
        };
        let entry = builder.create_block();
        builder.emit_block(entry);
        builder
    }

    pub fn function(&self) -> &IrFunction {
        &self.func
    }

    pub fn finish(self) -> IrFunction {
        self.func
    }

    pub(crate) fn function_mut(&mut self) -> &mut IrFunction {
        &mut self.func
    }

    // ── Blocks ──────────────────────────────────────────────────────

    fn alloc_block(&mut self) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(BasicBlock {
            id,
            args: Vec::new(),
            instructions: Vec::new(),
            terminator: None,
        });
        id
    }

    /// New block at the end of the layout.
    pub fn create_block(&mut self) -> BlockId {
        let id = self.alloc_block();
        self.func.layout.push(id);
        id
    }

    pub fn create_block_before(&mut self, before: BlockId) -> BlockId {
        let id = self.alloc_block();
        let pos = self.layout_position(before);
        self.func.layout.insert(pos, id);
        id
    }

    pub fn create_block_after(&mut self, after: BlockId) -> BlockId {
        let id = self.alloc_block();
        let pos = self.layout_position(after);
        self.func.layout.insert(pos + 1, id);
        id
    }

    fn layout_position(&self, block: BlockId) -> usize {
        self.func
            .layout
            .iter()
            .position(|b| *b == block)
            .unwrap_or(self.func.layout.len())
    }

    /// Move the insertion point to the end of `block`.
    pub fn emit_block(&mut self, block: BlockId) {
        self.insertion = Some(block);
    }

    pub fn insertion_block(&self) -> Option<BlockId> {
        self.insertion
    }

    /// False once the current block has been terminated.
    pub fn has_valid_insertion_point(&self) -> bool {
        match self.insertion {
            Some(b) => self.func.block(b).terminator.is_none(),
            None => false,
        }
    }

    pub fn add_block_arg(&mut self, block: BlockId, ty: Type, ownership: OwnershipKind) -> ValueId {
        let v = self.new_value(ty, ownership);
        self.func.block_mut(block).args.push(v);
        v
    }

    fn new_value(&mut self, ty: Type, ownership: OwnershipKind) -> ValueId {
        let id = ValueId(self.func.values.len() as u32);
        self.func.values.push(ValueInfo { ty, ownership });
        id
    }

    fn push(&mut self, kind: InstKind, loc: Location) {
        let block = match self.insertion {
            Some(b) if self.func.block(b).terminator.is_none() => b,
            _ => {
                // Unreachable code after a terminator still gets lowered;
                // park it in a fresh block nobody branches to.
                let b = self.create_block();
                self.insertion = Some(b);
                b
            }
        };
        self.func
            .block_mut(block)
            .instructions
            .push(Instruction { kind, loc });
    }

    fn terminate(&mut self, term: Terminator) {
        if let Some(b) = self.insertion {
            let block = self.func.block_mut(b);
            if block.terminator.is_none() {
                block.terminator = Some(term);
            }
        }
    }

    fn ownership_of(&self, v: ValueId) -> OwnershipKind {
        self.func.value(v).ownership
    }

    fn result_ownership(ty: &Type, ownership: OwnershipKind) -> OwnershipKind {
        if ty.is_trivial() {
            OwnershipKind::None
        } else {
            ownership
        }
    }

    // ── Instructions ────────────────────────────────────────────────

    pub fn create_hop_to_executor(&mut self, loc: Location, executor: ValueId, mandatory: bool) {
        self.push(InstKind::HopToExecutor { executor, mandatory }, loc);
    }

    pub fn create_optional_none(&mut self, loc: Location, ty: Type) -> ValueId {
        let result = self.new_value(ty, OwnershipKind::None);
        self.push(InstKind::OptionalNone { result }, loc);
        result
    }

    /// Wrap `operand` in `.some`; ownership is forwarded from the payload.
    pub fn create_optional_some(&mut self, loc: Location, operand: ValueId) -> ValueId {
        let payload_ty = self.func.value_type(operand).clone();
        let ownership = self.ownership_of(operand);
        let result = self.new_value(Type::optional(payload_ty), ownership);
        self.push(InstKind::OptionalSome { operand, result }, loc);
        result
    }

    pub fn create_metatype(
        &mut self,
        loc: Location,
        instance: Type,
        repr: MetatypeRepr,
    ) -> ValueId {
        let result = self.new_value(Type::metatype(instance, repr), OwnershipKind::None);
        self.push(InstKind::Metatype { result }, loc);
        result
    }

    pub fn create_builtin(
        &mut self,
        loc: Location,
        name: BuiltinName,
        result_ty: Type,
        subs: SubstitutionMap,
        args: Vec<ValueId>,
    ) -> ValueId {
        let ownership = Self::result_ownership(&result_ty, OwnershipKind::Owned);
        let result = self.new_value(result_ty, ownership);
        self.push(
            InstKind::Builtin {
                name,
                subs,
                args,
                result,
            },
            loc,
        );
        result
    }

    pub fn create_function_ref(&mut self, loc: Location, name: &str, fn_ty: Type) -> ValueId {
        let result = self.new_value(fn_ty, OwnershipKind::None);
        self.push(
            InstKind::FunctionRef {
                name: name.to_string(),
                result,
            },
            loc,
        );
        result
    }

    /// Load a copy of a global; the result is owned.
    pub fn create_global_load(&mut self, loc: Location, global: &str, ty: Type) -> ValueId {
        let ownership = Self::result_ownership(&ty, OwnershipKind::Owned);
        let result = self.new_value(ty, ownership);
        self.push(
            InstKind::GlobalLoad {
                global: global.to_string(),
                result,
            },
            loc,
        );
        result
    }

    /// Call `callee`; a non-trivial result is returned at +1.
    pub fn create_apply(
        &mut self,
        loc: Location,
        callee: ValueId,
        subs: SubstitutionMap,
        args: Vec<ValueId>,
        result_ty: Type,
    ) -> ValueId {
        let ownership = Self::result_ownership(&result_ty, OwnershipKind::Owned);
        let result = self.new_value(result_ty, ownership);
        self.push(
            InstKind::Apply {
                callee,
                subs,
                args,
                result,
            },
            loc,
        );
        result
    }

    pub fn create_begin_borrow(
        &mut self,
        loc: Location,
        operand: ValueId,
        formal: bool,
    ) -> ValueId {
        let ty = self.func.value_type(operand).clone();
        let result = self.new_value(ty, OwnershipKind::Guaranteed);
        self.push(
            InstKind::BeginBorrow {
                operand,
                result,
                formal,
            },
            loc,
        );
        result
    }

    pub fn create_end_borrow(&mut self, loc: Location, operand: ValueId) {
        self.push(InstKind::EndBorrow { operand }, loc);
    }

    pub fn create_copy_value(&mut self, loc: Location, operand: ValueId) -> ValueId {
        let ty = self.func.value_type(operand).clone();
        let result = self.new_value(ty, OwnershipKind::Owned);
        self.push(InstKind::CopyValue { operand, result }, loc);
        result
    }

    pub fn create_destroy_value(&mut self, loc: Location, operand: ValueId) {
        self.push(InstKind::DestroyValue { operand }, loc);
    }

    pub fn create_open_existential(
        &mut self,
        loc: Location,
        operand: ValueId,
        opened: Type,
    ) -> ValueId {
        let ownership = self.ownership_of(operand);
        let result = self.new_value(opened, ownership);
        self.push(InstKind::OpenExistential { operand, result }, loc);
        result
    }

    pub fn create_init_existential(
        &mut self,
        loc: Location,
        operand: ValueId,
        existential: Type,
        conformances: Vec<ProtocolConformanceRef>,
    ) -> ValueId {
        let ownership = self.ownership_of(operand);
        let result = self.new_value(existential, ownership);
        self.push(
            InstKind::InitExistential {
                operand,
                result,
                conformances,
            },
            loc,
        );
        result
    }

    pub fn create_extract_executor(&mut self, loc: Location, operand: ValueId) -> ValueId {
        let result = self.new_value(Type::executor(), OwnershipKind::None);
        self.push(InstKind::ExtractExecutor { operand, result }, loc);
        result
    }

    /// Expects a borrowed function; the result is a borrowed `(any Actor)?`.
    pub fn create_function_extract_isolation(
        &mut self,
        loc: Location,
        function: ValueId,
    ) -> ValueId {
        let result = self.new_value(Type::opaque_isolation(), OwnershipKind::Guaranteed);
        self.push(InstKind::FunctionExtractIsolation { function, result }, loc);
        result
    }

    pub fn create_load_var(&mut self, loc: Location, var: VarId, ty: Type) -> ValueId {
        let ownership = Self::result_ownership(&ty, OwnershipKind::Owned);
        let result = self.new_value(ty, ownership);
        self.push(InstKind::LoadVar { var, result }, loc);
        result
    }

    pub fn create_string_literal(&mut self, loc: Location, value: &str) -> ValueId {
        let result = self.new_value(Type::Builtin(BuiltinType::RawPointer), OwnershipKind::None);
        self.push(
            InstKind::StringLiteral {
                value: value.to_string(),
                result,
            },
            loc,
        );
        result
    }

    pub fn create_integer_literal(
        &mut self,
        loc: Location,
        ty: BuiltinType,
        value: i64,
    ) -> ValueId {
        let result = self.new_value(Type::Builtin(ty), OwnershipKind::None);
        self.push(InstKind::IntegerLiteral { value, result }, loc);
        result
    }

    pub fn create_isolation_rewrite_hook(
        &mut self,
        loc: Location,
        self_var: VarId,
        distributed: bool,
    ) {
        self.push(
            InstKind::IsolationRewriteHook {
                self_var,
                distributed,
            },
            loc,
        );
    }

    // ── Terminators ─────────────────────────────────────────────────

    pub fn create_return(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Return(value));
    }

    pub fn create_throw(&mut self, error: ValueId) {
        self.terminate(Terminator::Throw(error));
    }

    pub fn create_branch(&mut self, target: BlockId, args: Vec<ValueId>) {
        self.terminate(Terminator::Branch { target, args });
    }

    /// Branch on an optional. The payload becomes the single argument of
    /// `some` and is returned; it keeps the operand's ownership.
    pub fn create_switch_optional(
        &mut self,
        operand: ValueId,
        some: BlockId,
        none: BlockId,
    ) -> ValueId {
        let payload_ty = match self.func.value_type(operand).optional_object_type() {
            Some(inner) => inner.clone(),
            None => self.func.value_type(operand).clone(),
        };
        let ownership = self.ownership_of(operand);
        let payload = self.add_block_arg(some, payload_ty, ownership);
        self.terminate(Terminator::SwitchOptional { operand, some, none });
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isogen_core::span::Span;

    fn loc() -> Location {
        Location::regular(Span::dummy())
    }

    #[test]
    fn blocks_are_laid_out_relative_to_each_other() {
        let mut b = IrBuilder::new("f", false);
        let entry = b.function().entry();
        let none = b.create_block();
        let some = b.create_block_before(none);
        let cont = b.create_block_after(none);
        assert_eq!(b.function().layout, vec![entry, some, none, cont]);
    }

    #[test]
    fn switch_optional_passes_payload_to_some_block() {
        let mut b = IrBuilder::new("f", false);
        let opt = b.create_optional_none(loc(), Type::optional_executor());
        let none = b.create_block();
        let some = b.create_block_before(none);
        let payload = b.create_switch_optional(opt, some, none);
        let func = b.finish();
        assert_eq!(func.block(some).args, vec![payload]);
        assert_eq!(func.value_type(payload), &Type::executor());
        assert!(matches!(
            func.block(func.entry()).terminator,
            Some(Terminator::SwitchOptional { .. })
        ));
    }

    #[test]
    fn instructions_after_terminator_land_in_a_new_block() {
        let mut b = IrBuilder::new("f", false);
        b.create_return(None);
        assert!(!b.has_valid_insertion_point());
        let v = b.create_optional_none(loc(), Type::optional_executor());
        let func = b.finish();
        assert_eq!(func.layout.len(), 2);
        assert!(func.defining_instruction(v).is_some());
    }

    #[test]
    fn trivial_builtin_results_have_no_ownership() {
        let mut b = IrBuilder::new("f", false);
        let v = b.create_builtin(
            loc(),
            BuiltinName::BuildMainActorExecutorRef,
            Type::executor(),
            SubstitutionMap::empty(),
            vec![],
        );
        assert_eq!(b.function().value(v).ownership, OwnershipKind::None);
        assert_eq!(BuiltinName::BuildMainActorExecutorRef.to_string(), "buildMainActorExecutorRef");
    }
}
