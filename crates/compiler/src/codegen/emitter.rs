//! Per-function code emission (§4.4, §4.5).
//!
//! Every function body is emitted twice: a dry run that only walks the AST
//! to size the stack frame (so every local, global shadow and expression
//! temporary has a slot before any real instruction is written), and a real
//! run that emits against that known frame size. Both runs share the exact
//! same traversal, so they allocate identical slots in identical order —
//! the dry run just skips the `dynasm!` calls.

use std::collections::HashMap;

use dynasmrt::{dynasm, DynasmApi, DynasmLabelApi};
use jit_core::{Signature, Type};
use jit_runtime::CompiledFunction;

use crate::ast::{AssignOp, BinOp, Expr, ExprKind, FunctionDef, IncDecOp, Literal, Statement, UnaryOp};
use crate::codegen::error::{CgResult, CodeGenError};
use crate::codegen::regs::{Frame, WR0, WR1, WRB, XR0, XR1};
use crate::codegen::CodegenContext;

/// Bytes reserved below `rbp` for the three callee-saved work registers
/// this emitter clobbers, padded to keep the total frame 16-byte aligned.
const CALLEE_SAVE_BYTES: i32 = 32;
const CS_WR0: i32 = 8;
const CS_WR1: i32 = 16;
const CS_WRB: i32 = 24;

struct LoadedGlobal {
    slot: usize,
    ty: Type,
    dirty: bool,
}

pub fn emit_function(func: &FunctionDef, ctx: &CodegenContext) -> CgResult<(CompiledFunction, usize)> {
    // Pass 1: dry run, size the frame only.
    let frame_size = {
        let mut dry = FunctionEmitter::new_dry(func, ctx);
        dry.emit_entry()?;
        dry.emit_body(&func.body)?;
        CALLEE_SAVE_BYTES + dry.frame.frame_size()
    };

    // Pass 2: real emission, with `sub rsp` sized from the dry run above.
    // Both passes walk the identical AST in the identical order, so the
    // real run allocates the exact same slots the dry run counted.
    let mut asm = dynasmrt::x64::Assembler::new().map_err(|e| CodeGenError::Asm(e.to_string()))?;
    let entry_offset = asm.offset();
    {
        let mut live = FunctionEmitter::new_live(func, ctx, &mut asm, frame_size);
        live.emit_entry()?;
        live.emit_body(&func.body)?;
        live.finish()?;
    }

    let code = asm.finalize().map_err(|_| CodeGenError::Asm("unresolved labels in emitted code".to_string()))?;
    let signature = Signature::new(func.return_type, func.params.iter().map(|p| p.ty).collect());
    let raw = code.ptr(entry_offset);
    let entry_address = raw as usize;
    Ok((CompiledFunction::new(func.name.clone(), signature, code, entry_offset), entry_address))
}

/// One per function compile. Owns the frame layout and, in live mode, the
/// assembler; in dry mode `asm` is `None` and every emit call is a no-op
/// that still advances the frame.
struct FunctionEmitter<'a, 'b> {
    func: &'a FunctionDef,
    ctx: &'a CodegenContext<'a>,
    frame: Frame,
    loaded_globals: HashMap<String, LoadedGlobal>,
    epilogue: Option<dynasmrt::DynamicLabel>,
    asm: Option<&'b mut dynasmrt::x64::Assembler>,
    /// `CALLEE_SAVE_BYTES + frame.frame_size()` as computed by the dry run;
    /// unused (left 0) in dry mode itself.
    total_frame_size: i32,
}

impl<'a, 'b> FunctionEmitter<'a, 'b> {
    fn new_dry(func: &'a FunctionDef, ctx: &'a CodegenContext<'a>) -> Self {
        FunctionEmitter {
            func,
            ctx,
            frame: Frame::new(),
            loaded_globals: HashMap::new(),
            epilogue: None,
            asm: None,
            total_frame_size: 0,
        }
    }

    fn new_live(func: &'a FunctionDef, ctx: &'a CodegenContext<'a>, asm: &'b mut dynasmrt::x64::Assembler, total_frame_size: i32) -> Self {
        let epilogue = asm.new_dynamic_label();
        FunctionEmitter {
            func,
            ctx,
            frame: Frame::new(),
            loaded_globals: HashMap::new(),
            epilogue: Some(epilogue),
            asm: Some(asm),
            total_frame_size,
        }
    }

    fn is_live(&self) -> bool {
        self.asm.is_some()
    }

    fn new_label(&mut self) -> Option<dynasmrt::DynamicLabel> {
        self.asm.as_mut().map(|a| a.new_dynamic_label())
    }

    fn offset(slot: usize) -> i32 {
        CALLEE_SAVE_BYTES + Frame::slot_offset(slot)
    }

    // -- entry/exit ---------------------------------------------------------

    /// Emit `push rbp; mov rbp, rsp; sub rsp, total_frame_size` (the size
    /// having already been measured by the dry run) and spill incoming
    /// arguments into their parameter slots in both modes.
    fn emit_entry(&mut self) -> CgResult<()> {
        if self.is_live() {
            let total = self.total_frame_size;
            let asm = self.asm.as_mut().unwrap();
            dynasm!(asm
                ; push rbp
                ; mov rbp, rsp
                ; sub rsp, DWORD total
            );
        }

        let mut gp_idx = 0usize;
        let mut xmm_idx = 0usize;
        let params: Vec<_> = self.func.params.clone();
        for p in &params {
            let slot = self.frame.declare(&p.name, p.ty, false);
            let off = Self::offset(slot);
            match p.ty.operand_class() {
                jit_core::types::OperandClass::Gp32 => {
                    let reg = [dynasmrt::x64::Rq::RDI, dynasmrt::x64::Rq::RSI][gp_idx];
                    gp_idx += 1;
                    if let Some(asm) = self.asm.as_mut() {
                        dynasm!(asm ; mov [rbp - off], Rd(reg.code()));
                    }
                }
                jit_core::types::OperandClass::Gp64 => {
                    let reg = [dynasmrt::x64::Rq::RDI, dynasmrt::x64::Rq::RSI][gp_idx];
                    gp_idx += 1;
                    if let Some(asm) = self.asm.as_mut() {
                        dynasm!(asm ; mov [rbp - off], Rq(reg.code()));
                    }
                }
                jit_core::types::OperandClass::XmmSingle => {
                    let xr = [dynasmrt::x64::Rx::XMM0, dynasmrt::x64::Rx::XMM1][xmm_idx];
                    xmm_idx += 1;
                    if let Some(asm) = self.asm.as_mut() {
                        dynasm!(asm ; movss [rbp - off], Rx(xr.code()));
                    }
                }
                jit_core::types::OperandClass::XmmDouble => {
                    let xr = [dynasmrt::x64::Rx::XMM0, dynasmrt::x64::Rx::XMM1][xmm_idx];
                    xmm_idx += 1;
                    if let Some(asm) = self.asm.as_mut() {
                        dynasm!(asm ; movsd [rbp - off], Rx(xr.code()));
                    }
                }
            }
        }

        if self.is_live() {
            let asm = self.asm.as_mut().unwrap();
            dynasm!(asm
                ; mov [rbp - CS_WR0], Rq(WR0.code())
                ; mov [rbp - CS_WR1], Rq(WR1.code())
                ; mov [rbp - CS_WRB], Rq(WRB.code())
            );
        }
        Ok(())
    }

    /// Emit the shared epilogue every `return` jumps to: restore the
    /// callee-saved work registers, tear down the frame, `ret`.
    fn finish(&mut self) -> CgResult<()> {
        if let Some(asm) = self.asm.as_mut() {
            let epilogue = self.epilogue.unwrap();
            dynasm!(asm
                ; => epilogue
                ; mov Rq(WR0.code()), [rbp - CS_WR0]
                ; mov Rq(WR1.code()), [rbp - CS_WR1]
                ; mov Rq(WRB.code()), [rbp - CS_WRB]
                ; mov rsp, rbp
                ; pop rbp
                ; ret
            );
        }
        Ok(())
    }

    // -- statements -----------------------------------------------------

    fn emit_body(&mut self, body: &[Statement]) -> CgResult<()> {
        for stmt in body {
            self.emit_statement(stmt)?;
        }
        Ok(())
    }

    fn emit_statement(&mut self, stmt: &Statement) -> CgResult<()> {
        match stmt {
            Statement::Declaration { ty, name, init, offset, is_const } => {
                let slot = self.frame.declare(name, *ty, *is_const);
                match init {
                    Some(expr) => {
                        let (vslot, vty) = self.emit_expr(expr)?;
                        if vty != *ty {
                            return Err(CodeGenError::logic(
                                format!("cannot initialize \"{name}\" ({ty}) from a value of type {vty} without a cast"),
                                *offset,
                            ));
                        }
                        self.copy_slot(vslot, slot, *ty);
                    }
                    None => self.zero_slot(slot, *ty),
                }
                Ok(())
            }
            Statement::Assign { name, op, value, offset } => {
                let (target_slot, ty, is_global) = self.resolve_lvalue(name, *offset)?;
                let (vslot, vty) = self.emit_expr(value)?;
                if *op == AssignOp::Assign {
                    if vty != ty {
                        return Err(CodeGenError::logic(
                            format!("cannot assign a value of type {vty} to \"{name}\" ({ty}) without a cast"),
                            *offset,
                        ));
                    }
                    self.copy_slot(vslot, target_slot, ty);
                } else {
                    let rhs_literal = Self::int_pow2_literal(value);
                    self.compound_store(target_slot, ty, *op, vslot, vty, *offset, rhs_literal)?;
                }
                if is_global {
                    self.mark_dirty(name);
                }
                Ok(())
            }
            Statement::IncDecStatement { name, op, offset } => {
                let (slot, ty, is_global) = self.resolve_lvalue(name, *offset)?;
                if ty != Type::Int {
                    return Err(CodeGenError::logic(format!("\"{name}\" must be int to use ++/--"), *offset));
                }
                self.incdec_slot(slot, *op);
                if is_global {
                    self.mark_dirty(name);
                }
                Ok(())
            }
            Statement::IndexAssign { buffer, index, op, value, offset } => {
                self.emit_index_assign(buffer, index, *op, value, *offset)
            }
            Statement::BufferMethodCall { target, method, args, offset } => {
                self.emit_buffer_method_call(target, method, args, *offset)
            }
            Statement::Return { value, offset, .. } => self.emit_return(value.as_ref(), *offset),
            Statement::Expr(expr) => {
                self.emit_expr(expr)?;
                Ok(())
            }
        }
    }

    fn emit_return(&mut self, value: Option<&Expr>, offset: usize) -> CgResult<()> {
        let result = match value {
            Some(expr) => {
                let (slot, ty) = self.emit_expr(expr)?;
                if ty != self.func.return_type {
                    return Err(CodeGenError::logic(
                        format!(
                            "return type mismatch: function returns {}, expression is {ty}",
                            self.func.return_type
                        ),
                        offset,
                    ));
                }
                Some(slot)
            }
            None => {
                if self.func.return_type != Type::Void {
                    return Err(CodeGenError::logic("missing return value", offset));
                }
                None
            }
        };

        // The return value is safely parked in its own frame slot, so
        // flushing dirty globals afterward can use WR0/WR1/xmm freely
        // without clobbering it.
        self.flush_globals();

        if let Some(slot) = result {
            let off = Self::offset(slot);
            if let Some(asm) = self.asm.as_mut() {
                match self.func.return_type.operand_class() {
                    jit_core::types::OperandClass::Gp32 => dynasm!(asm ; mov eax, [rbp - off]),
                    jit_core::types::OperandClass::Gp64 => dynasm!(asm ; mov rax, [rbp - off]),
                    jit_core::types::OperandClass::XmmSingle => dynasm!(asm ; movss xmm0, [rbp - off]),
                    jit_core::types::OperandClass::XmmDouble => dynasm!(asm ; movsd xmm0, [rbp - off]),
                }
            }
        }

        if let Some(asm) = self.asm.as_mut() {
            let epilogue = self.epilogue.unwrap();
            dynasm!(asm ; jmp => epilogue);
        }
        Ok(())
    }

    /// Resolve an assignable name to its frame slot, declaring the
    /// global's load-once shadow slot on first reference (§4.4). Rejects
    /// `const`-qualified locals and globals with a located error.
    fn resolve_lvalue(&mut self, name: &str, offset: usize) -> CgResult<(usize, Type, bool)> {
        if let Some((slot, ty, is_const)) = self.frame.lookup(name) {
            if is_const {
                return Err(CodeGenError::logic(format!("can't assign to const variable \"{name}\""), offset));
            }
            return Ok((slot, ty, false));
        }
        let (_, _, global_is_const) = self.find_global(name, offset)?;
        if global_is_const {
            return Err(CodeGenError::logic(format!("can't assign to const variable \"{name}\""), offset));
        }
        let (slot, ty) = self.ensure_global_loaded(name, offset)?;
        Ok((slot, ty, true))
    }

    fn mark_dirty(&mut self, name: &str) {
        if let Some(lg) = self.loaded_globals.get_mut(name) {
            lg.dirty = true;
        }
    }

    // -- globals ----------------------------------------------------------

    fn find_global(&self, name: &str, offset: usize) -> CgResult<(Type, usize, bool)> {
        self.ctx
            .globals
            .iter()
            .find(|g| g.name == name)
            .map(|g| (g.ty, g.address, g.is_const))
            .ok_or_else(|| CodeGenError::logic(format!("\"{name}\" is not defined"), offset))
    }

    fn ensure_global_loaded(&mut self, name: &str, offset: usize) -> CgResult<(usize, Type)> {
        if let Some(lg) = self.loaded_globals.get(name) {
            return Ok((lg.slot, lg.ty));
        }
        let (ty, address, _is_const) = self.find_global(name, offset)?;
        let slot = self.frame.temp_slot();
        let off = Self::offset(slot);
        if let Some(asm) = self.asm.as_mut() {
            let addr = address as i64;
            match ty.operand_class() {
                jit_core::types::OperandClass::Gp32 => dynasm!(asm
                    ; mov Rq(WR0.code()), QWORD addr
                    ; mov Rd(WR1.code()), [Rq(WR0.code())]
                    ; mov [rbp - off], Rd(WR1.code())
                ),
                jit_core::types::OperandClass::Gp64 => dynasm!(asm
                    ; mov Rq(WR0.code()), QWORD addr
                    ; mov Rq(WR1.code()), [Rq(WR0.code())]
                    ; mov [rbp - off], Rq(WR1.code())
                ),
                jit_core::types::OperandClass::XmmSingle => dynasm!(asm
                    ; mov Rq(WR0.code()), QWORD addr
                    ; movss Rx(XR0.code()), [Rq(WR0.code())]
                    ; movss [rbp - off], Rx(XR0.code())
                ),
                jit_core::types::OperandClass::XmmDouble => dynasm!(asm
                    ; mov Rq(WR0.code()), QWORD addr
                    ; movsd Rx(XR0.code()), [Rq(WR0.code())]
                    ; movsd [rbp - off], Rx(XR0.code())
                ),
            }
        }
        self.loaded_globals.insert(name.to_string(), LoadedGlobal { slot, ty, dirty: false });
        Ok((slot, ty))
    }

    /// Write every dirty loaded global back to its storage address (§4.4
    /// "flush on every return path").
    fn flush_globals(&mut self) {
        let names: Vec<String> = self
            .loaded_globals
            .iter()
            .filter(|(_, lg)| lg.dirty)
            .map(|(n, _)| n.clone())
            .collect();
        for name in names {
            let lg_slot;
            let lg_ty;
            {
                let lg = &self.loaded_globals[&name];
                lg_slot = lg.slot;
                lg_ty = lg.ty;
            }
            let (_, address, _) = match self.find_global(&name, 0) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let off = Self::offset(lg_slot);
            if let Some(asm) = self.asm.as_mut() {
                let addr = address as i64;
                match lg_ty.operand_class() {
                    jit_core::types::OperandClass::Gp32 => dynasm!(asm
                        ; mov Rd(WR1.code()), [rbp - off]
                        ; mov Rq(WR0.code()), QWORD addr
                        ; mov [Rq(WR0.code())], Rd(WR1.code())
                    ),
                    jit_core::types::OperandClass::Gp64 => dynasm!(asm
                        ; mov Rq(WR1.code()), [rbp - off]
                        ; mov Rq(WR0.code()), QWORD addr
                        ; mov [Rq(WR0.code())], Rq(WR1.code())
                    ),
                    jit_core::types::OperandClass::XmmSingle => dynasm!(asm
                        ; movss Rx(XR0.code()), [rbp - off]
                        ; mov Rq(WR0.code()), QWORD addr
                        ; movss [Rq(WR0.code())], Rx(XR0.code())
                    ),
                    jit_core::types::OperandClass::XmmDouble => dynasm!(asm
                        ; movsd Rx(XR0.code()), [rbp - off]
                        ; mov Rq(WR0.code()), QWORD addr
                        ; movsd [Rq(WR0.code())], Rx(XR0.code())
                    ),
                }
            }
        }
    }

    // -- slot utilities -----------------------------------------------------

    fn zero_slot(&mut self, slot: usize, ty: Type) {
        let off = Self::offset(slot);
        if let Some(asm) = self.asm.as_mut() {
            match ty.operand_class() {
                jit_core::types::OperandClass::Gp32 => dynasm!(asm
                    ; xor Rd(WR0.code()), Rd(WR0.code())
                    ; mov [rbp - off], Rd(WR0.code())
                ),
                jit_core::types::OperandClass::Gp64 => dynasm!(asm
                    ; xor Rq(WR0.code()), Rq(WR0.code())
                    ; mov [rbp - off], Rq(WR0.code())
                ),
                jit_core::types::OperandClass::XmmSingle => dynasm!(asm
                    ; xorps Rx(XR0.code()), Rx(XR0.code())
                    ; movss [rbp - off], Rx(XR0.code())
                ),
                jit_core::types::OperandClass::XmmDouble => dynasm!(asm
                    ; xorpd Rx(XR0.code()), Rx(XR0.code())
                    ; movsd [rbp - off], Rx(XR0.code())
                ),
            }
        }
    }

    fn copy_slot(&mut self, from: usize, to: usize, ty: Type) {
        if from == to {
            return;
        }
        let foff = Self::offset(from);
        let toff = Self::offset(to);
        if let Some(asm) = self.asm.as_mut() {
            match ty.operand_class() {
                jit_core::types::OperandClass::Gp32 => dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - foff]
                    ; mov [rbp - toff], Rd(WR0.code())
                ),
                jit_core::types::OperandClass::Gp64 => dynasm!(asm
                    ; mov Rq(WR0.code()), [rbp - foff]
                    ; mov [rbp - toff], Rq(WR0.code())
                ),
                jit_core::types::OperandClass::XmmSingle => dynasm!(asm
                    ; movss Rx(XR0.code()), [rbp - foff]
                    ; movss [rbp - toff], Rx(XR0.code())
                ),
                jit_core::types::OperandClass::XmmDouble => dynasm!(asm
                    ; movsd Rx(XR0.code()), [rbp - foff]
                    ; movsd [rbp - toff], Rx(XR0.code())
                ),
            }
        }
    }

    fn incdec_slot(&mut self, slot: usize, op: IncDecOp) {
        let off = Self::offset(slot);
        if let Some(asm) = self.asm.as_mut() {
            match op {
                IncDecOp::Inc => dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - off]
                    ; add Rd(WR0.code()), 1
                    ; mov [rbp - off], Rd(WR0.code())
                ),
                IncDecOp::Dec => dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - off]
                    ; sub Rd(WR0.code()), 1
                    ; mov [rbp - off], Rd(WR0.code())
                ),
            }
        }
    }

    /// `op=` on an already-resolved lvalue slot: load current value, apply
    /// the binary op against the rhs slot, store back.
    fn compound_store(
        &mut self,
        target: usize,
        ty: Type,
        op: AssignOp,
        vslot: usize,
        vty: Type,
        offset: usize,
        rhs_literal: Option<i32>,
    ) -> CgResult<()> {
        if vty != ty {
            return Err(CodeGenError::logic(
                format!("operand of compound assignment is {vty}, target is {ty}; casts are never implicit"),
                offset,
            ));
        }
        let binop = match op {
            AssignOp::AddAssign => BinOp::Add,
            AssignOp::SubAssign => BinOp::Sub,
            AssignOp::MulAssign => BinOp::Mul,
            AssignOp::DivAssign => BinOp::Div,
            AssignOp::RemAssign => BinOp::Rem,
            AssignOp::Assign => unreachable!("plain assign handled by caller"),
        };
        let result = self.emit_binary_on_slots(binop, target, vslot, ty, offset, rhs_literal)?;
        self.copy_slot(result, target, ty);
        Ok(())
    }

    // -- expressions ----------------------------------------------------

    fn emit_expr(&mut self, expr: &Expr) -> CgResult<(usize, Type)> {
        match &expr.kind {
            ExprKind::Literal(lit) => self.emit_literal(lit),
            ExprKind::Ident(name) => {
                if let Some((slot, ty, _is_const)) = self.frame.lookup(name) {
                    return Ok((slot, ty));
                }
                self.ensure_global_loaded(name, expr.offset)
            }
            ExprKind::Cast(target_ty, inner) => self.emit_cast(*target_ty, inner, expr.offset),
            ExprKind::Unary(op, inner) => self.emit_unary(*op, inner, expr.offset),
            ExprKind::IncDec { target, op, pos } => self.emit_incdec_expr(target, *op, *pos, expr.offset),
            ExprKind::Binary(op, lhs, rhs) => {
                let (lslot, lty) = self.emit_expr(lhs)?;
                let (rslot, rty) = self.emit_expr(rhs)?;
                if lty != rty {
                    return Err(CodeGenError::logic(
                        format!("operands of {op:?} have different types ({lty} vs {rty}); casts are never implicit"),
                        expr.offset,
                    ));
                }
                let rhs_literal = Self::int_pow2_literal(rhs);
                let slot = self.emit_binary_on_slots(*op, lslot, rslot, lty, expr.offset, rhs_literal)?;
                let result_ty = if matches!(
                    op,
                    BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
                ) {
                    Type::Bool
                } else {
                    lty
                };
                Ok((slot, result_ty))
            }
            ExprKind::Ternary { cond, if_true, if_false } => self.emit_ternary(cond, if_true, if_false, expr.offset),
            ExprKind::Call { name, args } => self.emit_call(name, args, expr.offset),
            ExprKind::Index { buffer, index } => self.emit_index_read(buffer, index, expr.offset),
            ExprKind::MethodCall { target, method, args } => {
                self.emit_method_call_expr(target, method, args, expr.offset)
            }
        }
    }

    fn emit_literal(&mut self, lit: &Literal) -> CgResult<(usize, Type)> {
        let (slot, ty) = match lit {
            Literal::Int(v) => {
                let slot = self.frame.temp_slot();
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    let imm = *v;
                    dynasm!(asm ; mov Rd(WR0.code()), DWORD imm ; mov [rbp - off], Rd(WR0.code()));
                }
                (slot, Type::Int)
            }
            Literal::Bool(v) => {
                let slot = self.frame.temp_slot();
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    let imm = *v as i32;
                    dynasm!(asm ; mov Rd(WR0.code()), DWORD imm ; mov [rbp - off], Rd(WR0.code()));
                }
                (slot, Type::Bool)
            }
            Literal::Float(v) => {
                let slot = self.frame.temp_slot();
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    let bits = v.to_bits() as i32;
                    dynasm!(asm
                        ; mov Rd(WR0.code()), DWORD bits
                        ; movd Rx(XR0.code()), Rd(WR0.code())
                        ; movss [rbp - off], Rx(XR0.code())
                    );
                }
                (slot, Type::Float)
            }
            Literal::Double(v) => {
                let slot = self.frame.temp_slot();
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    let bits = v.to_bits() as i64;
                    dynasm!(asm
                        ; mov Rq(WR0.code()), QWORD bits
                        ; movq Rx(XR0.code()), Rq(WR0.code())
                        ; movsd [rbp - off], Rx(XR0.code())
                    );
                }
                (slot, Type::Double)
            }
        };
        Ok((slot, ty))
    }

    fn emit_cast(&mut self, target: Type, inner: &Expr, offset: usize) -> CgResult<(usize, Type)> {
        let (src_slot, src_ty) = self.emit_expr(inner)?;
        if src_ty == target {
            return Ok((src_slot, target));
        }
        if src_ty == Type::Buffer || target == Type::Buffer || target == Type::Void {
            return Err(CodeGenError::logic(format!("cannot cast {src_ty} to {target}"), offset));
        }
        let src_off = Self::offset(src_slot);
        let dst_slot = self.frame.temp_slot();
        let dst_off = Self::offset(dst_slot);

        if let Some(asm) = self.asm.as_mut() {
            match (src_ty, target) {
                (Type::Int, Type::Float) | (Type::Bool, Type::Float) => dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - src_off]
                    ; cvtsi2ss Rx(XR0.code()), Rd(WR0.code())
                    ; movss [rbp - dst_off], Rx(XR0.code())
                ),
                (Type::Int, Type::Double) | (Type::Bool, Type::Double) => dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - src_off]
                    ; cvtsi2sd Rx(XR0.code()), Rd(WR0.code())
                    ; movsd [rbp - dst_off], Rx(XR0.code())
                ),
                (Type::Float, Type::Int) => dynasm!(asm
                    ; movss Rx(XR0.code()), [rbp - src_off]
                    ; cvttss2si Rd(WR0.code()), Rx(XR0.code())
                    ; mov [rbp - dst_off], Rd(WR0.code())
                ),
                (Type::Double, Type::Int) => dynasm!(asm
                    ; movsd Rx(XR0.code()), [rbp - src_off]
                    ; cvttsd2si Rd(WR0.code()), Rx(XR0.code())
                    ; mov [rbp - dst_off], Rd(WR0.code())
                ),
                (Type::Float, Type::Double) => dynasm!(asm
                    ; movss Rx(XR0.code()), [rbp - src_off]
                    ; cvtss2sd Rx(XR0.code()), Rx(XR0.code())
                    ; movsd [rbp - dst_off], Rx(XR0.code())
                ),
                (Type::Double, Type::Float) => dynasm!(asm
                    ; movsd Rx(XR0.code()), [rbp - src_off]
                    ; cvtsd2ss Rx(XR0.code()), Rx(XR0.code())
                    ; movss [rbp - dst_off], Rx(XR0.code())
                ),
                (Type::Int, Type::Bool) => dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - src_off]
                    ; test Rd(WR0.code()), Rd(WR0.code())
                    ; setne Rb(WR0.code())
                    ; movzx Rd(WR0.code()), Rb(WR0.code())
                    ; mov [rbp - dst_off], Rd(WR0.code())
                ),
                (Type::Bool, Type::Int) => dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - src_off]
                    ; mov [rbp - dst_off], Rd(WR0.code())
                ),
                (Type::Float, Type::Bool) => dynasm!(asm
                    ; xorps Rx(XR1.code()), Rx(XR1.code())
                    ; movss Rx(XR0.code()), [rbp - src_off]
                    ; ucomiss Rx(XR0.code()), Rx(XR1.code())
                    ; setne Rb(WR0.code())
                    ; movzx Rd(WR0.code()), Rb(WR0.code())
                    ; mov [rbp - dst_off], Rd(WR0.code())
                ),
                (Type::Double, Type::Bool) => dynasm!(asm
                    ; xorpd Rx(XR1.code()), Rx(XR1.code())
                    ; movsd Rx(XR0.code()), [rbp - src_off]
                    ; ucomisd Rx(XR0.code()), Rx(XR1.code())
                    ; setne Rb(WR0.code())
                    ; movzx Rd(WR0.code()), Rb(WR0.code())
                    ; mov [rbp - dst_off], Rd(WR0.code())
                ),
                _ => unreachable!("exhausted by the closed scalar type set"),
            }
        }
        Ok((dst_slot, target))
    }

    fn emit_unary(&mut self, op: UnaryOp, inner: &Expr, offset: usize) -> CgResult<(usize, Type)> {
        let (slot, ty) = self.emit_expr(inner)?;
        match (op, ty) {
            (UnaryOp::Neg, Type::Int) => {
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    dynasm!(asm ; mov Rd(WR0.code()), [rbp - off] ; neg Rd(WR0.code()) ; mov [rbp - off], Rd(WR0.code()));
                }
                Ok((slot, Type::Int))
            }
            (UnaryOp::Neg, Type::Float) => {
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    dynasm!(asm
                        ; movss Rx(XR0.code()), [rbp - off]
                        ; xorps Rx(XR1.code()), Rx(XR1.code())
                        ; subss Rx(XR1.code()), Rx(XR0.code())
                        ; movss [rbp - off], Rx(XR1.code())
                    );
                }
                Ok((slot, Type::Float))
            }
            (UnaryOp::Neg, Type::Double) => {
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    dynasm!(asm
                        ; movsd Rx(XR0.code()), [rbp - off]
                        ; xorpd Rx(XR1.code()), Rx(XR1.code())
                        ; subsd Rx(XR1.code()), Rx(XR0.code())
                        ; movsd [rbp - off], Rx(XR1.code())
                    );
                }
                Ok((slot, Type::Double))
            }
            (UnaryOp::Not, Type::Bool) => {
                let off = Self::offset(slot);
                if let Some(asm) = self.asm.as_mut() {
                    dynasm!(asm ; mov Rd(WR0.code()), [rbp - off] ; xor Rd(WR0.code()), 1 ; mov [rbp - off], Rd(WR0.code()));
                }
                Ok((slot, Type::Bool))
            }
            _ => Err(CodeGenError::logic(format!("operator {op:?} is not defined for {ty}"), offset)),
        }
    }

    fn emit_incdec_expr(
        &mut self,
        target: &str,
        op: IncDecOp,
        pos: crate::ast::IncDecPos,
        offset: usize,
    ) -> CgResult<(usize, Type)> {
        let (slot, ty, is_global) = self.resolve_lvalue(target, offset)?;
        if ty != Type::Int {
            return Err(CodeGenError::logic(format!("\"{target}\" must be int to use ++/--"), offset));
        }
        let result_slot = if pos == crate::ast::IncDecPos::Post {
            let r = self.frame.temp_slot();
            self.copy_slot(slot, r, Type::Int);
            r
        } else {
            slot
        };
        self.incdec_slot(slot, op);
        if is_global {
            self.mark_dirty(target);
        }
        if pos == crate::ast::IncDecPos::Pre {
            Ok((slot, Type::Int))
        } else {
            Ok((result_slot, Type::Int))
        }
    }

    /// If `expr` is an int literal that is a positive power of two, returns
    /// it — used to detect the `%` bit-mask fast path (§4.4) at its call
    /// site, where the AST is still available.
    fn int_pow2_literal(expr: &Expr) -> Option<i32> {
        match &expr.kind {
            ExprKind::Literal(Literal::Int(v)) if *v > 0 && (*v as u32).is_power_of_two() => Some(*v),
            _ => None,
        }
    }

    fn emit_binary_on_slots(
        &mut self,
        op: BinOp,
        lslot: usize,
        rslot: usize,
        ty: Type,
        offset: usize,
        rhs_literal: Option<i32>,
    ) -> CgResult<usize> {
        let loff = Self::offset(lslot);
        let roff = Self::offset(rslot);
        let dst = self.frame.temp_slot();
        let doff = Self::offset(dst);

        match ty {
            Type::Int => self.emit_int_binary(op, loff, roff, doff, offset, rhs_literal)?,
            Type::Float => self.emit_float_binary(op, loff, roff, doff, false, offset)?,
            Type::Double => self.emit_float_binary(op, loff, roff, doff, true, offset)?,
            Type::Bool => self.emit_bool_binary(op, loff, roff, doff, offset)?,
            Type::Buffer | Type::Void => {
                return Err(CodeGenError::logic(format!("operator {op:?} is not defined for {ty}"), offset));
            }
        }
        Ok(dst)
    }

    fn emit_int_binary(&mut self, op: BinOp, loff: i32, roff: i32, doff: i32, offset: usize, rhs_literal: Option<i32>) -> CgResult<()> {
        let Some(asm) = self.asm.as_mut() else {
            return Ok(());
        };
        match op {
            BinOp::Add => dynasm!(asm
                ; mov Rd(WR0.code()), [rbp - loff]
                ; mov Rd(WR1.code()), [rbp - roff]
                ; add Rd(WR0.code()), Rd(WR1.code())
                ; mov [rbp - doff], Rd(WR0.code())
            ),
            BinOp::Sub => dynasm!(asm
                ; mov Rd(WR0.code()), [rbp - loff]
                ; mov Rd(WR1.code()), [rbp - roff]
                ; sub Rd(WR0.code()), Rd(WR1.code())
                ; mov [rbp - doff], Rd(WR0.code())
            ),
            BinOp::Mul => dynasm!(asm
                ; mov Rd(WR0.code()), [rbp - loff]
                ; mov Rd(WR1.code()), [rbp - roff]
                ; imul Rd(WR0.code()), Rd(WR1.code())
                ; mov [rbp - doff], Rd(WR0.code())
            ),
            BinOp::Div => dynasm!(asm
                ; mov eax, [rbp - loff]
                ; mov Rd(WR1.code()), [rbp - roff]
                ; cdq
                ; idiv Rd(WR1.code())
                ; mov [rbp - doff], eax
            ),
            BinOp::Rem => match rhs_literal {
                Some(v) => {
                    let mask = v - 1;
                    dynasm!(asm
                        ; mov Rd(WR0.code()), [rbp - loff]
                        ; and Rd(WR0.code()), mask
                        ; mov [rbp - doff], Rd(WR0.code())
                    )
                }
                None => dynasm!(asm
                    ; mov eax, [rbp - loff]
                    ; mov Rd(WR1.code()), [rbp - roff]
                    ; cdq
                    ; idiv Rd(WR1.code())
                    ; mov [rbp - doff], edx
                ),
            },
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - loff]
                    ; mov Rd(WR1.code()), [rbp - roff]
                    ; cmp Rd(WR0.code()), Rd(WR1.code())
                );
                match op {
                    BinOp::Eq => dynasm!(asm ; sete Rb(WR0.code())),
                    BinOp::Ne => dynasm!(asm ; setne Rb(WR0.code())),
                    BinOp::Lt => dynasm!(asm ; setl Rb(WR0.code())),
                    BinOp::Le => dynasm!(asm ; setle Rb(WR0.code())),
                    BinOp::Gt => dynasm!(asm ; setg Rb(WR0.code())),
                    BinOp::Ge => dynasm!(asm ; setge Rb(WR0.code())),
                    _ => unreachable!(),
                }
                dynasm!(asm
                    ; movzx Rd(WR0.code()), Rb(WR0.code())
                    ; mov [rbp - doff], Rd(WR0.code())
                );
            }
            BinOp::And | BinOp::Or => {
                return Err(CodeGenError::logic("&&/|| require bool operands".to_string(), offset));
            }
        }
        Ok(())
    }

    fn emit_float_binary(&mut self, op: BinOp, loff: i32, roff: i32, doff: i32, is_double: bool, offset: usize) -> CgResult<()> {
        if op == BinOp::Rem {
            return Err(CodeGenError::logic("% is only defined for int".to_string(), offset));
        }
        if matches!(op, BinOp::And | BinOp::Or) {
            return Err(CodeGenError::logic("&&/|| require bool operands".to_string(), offset));
        }
        let Some(asm) = self.asm.as_mut() else {
            return Ok(());
        };
        if is_double {
            dynasm!(asm ; movsd Rx(XR0.code()), [rbp - loff] ; movsd Rx(XR1.code()), [rbp - roff]);
            match op {
                BinOp::Add => dynasm!(asm ; addsd Rx(XR0.code()), Rx(XR1.code()) ; movsd [rbp - doff], Rx(XR0.code())),
                BinOp::Sub => dynasm!(asm ; subsd Rx(XR0.code()), Rx(XR1.code()) ; movsd [rbp - doff], Rx(XR0.code())),
                BinOp::Mul => dynasm!(asm ; mulsd Rx(XR0.code()), Rx(XR1.code()) ; movsd [rbp - doff], Rx(XR0.code())),
                BinOp::Div => dynasm!(asm ; divsd Rx(XR0.code()), Rx(XR1.code()) ; movsd [rbp - doff], Rx(XR0.code())),
                _ => {
                    dynasm!(asm ; ucomisd Rx(XR0.code()), Rx(XR1.code()));
                    self.emit_setcc_from_flags(op, doff);
                }
            }
        } else {
            dynasm!(asm ; movss Rx(XR0.code()), [rbp - loff] ; movss Rx(XR1.code()), [rbp - roff]);
            match op {
                BinOp::Add => dynasm!(asm ; addss Rx(XR0.code()), Rx(XR1.code()) ; movss [rbp - doff], Rx(XR0.code())),
                BinOp::Sub => dynasm!(asm ; subss Rx(XR0.code()), Rx(XR1.code()) ; movss [rbp - doff], Rx(XR0.code())),
                BinOp::Mul => dynasm!(asm ; mulss Rx(XR0.code()), Rx(XR1.code()) ; movss [rbp - doff], Rx(XR0.code())),
                BinOp::Div => dynasm!(asm ; divss Rx(XR0.code()), Rx(XR1.code()) ; movss [rbp - doff], Rx(XR0.code())),
                _ => {
                    dynasm!(asm ; ucomiss Rx(XR0.code()), Rx(XR1.code()));
                    self.emit_setcc_from_flags(op, doff);
                }
            }
        }
        Ok(())
    }

    fn emit_setcc_from_flags(&mut self, op: BinOp, doff: i32) {
        let Some(asm) = self.asm.as_mut() else {
            return;
        };
        match op {
            BinOp::Eq => dynasm!(asm ; sete Rb(WR0.code())),
            BinOp::Ne => dynasm!(asm ; setne Rb(WR0.code())),
            BinOp::Lt => dynasm!(asm ; setb Rb(WR0.code())),
            BinOp::Le => dynasm!(asm ; setbe Rb(WR0.code())),
            BinOp::Gt => dynasm!(asm ; seta Rb(WR0.code())),
            BinOp::Ge => dynasm!(asm ; setae Rb(WR0.code())),
            _ => unreachable!(),
        }
        dynasm!(asm
            ; movzx Rd(WR0.code()), Rb(WR0.code())
            ; mov [rbp - doff], Rd(WR0.code())
        );
    }

    fn emit_bool_binary(&mut self, op: BinOp, loff: i32, roff: i32, doff: i32, offset: usize) -> CgResult<()> {
        match op {
            BinOp::Eq | BinOp::Ne => {
                let Some(asm) = self.asm.as_mut() else {
                    return Ok(());
                };
                dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - loff]
                    ; mov Rd(WR1.code()), [rbp - roff]
                    ; cmp Rd(WR0.code()), Rd(WR1.code())
                );
                if op == BinOp::Eq {
                    dynasm!(asm ; sete Rb(WR0.code()));
                } else {
                    dynasm!(asm ; setne Rb(WR0.code()));
                }
                dynasm!(asm
                    ; movzx Rd(WR0.code()), Rb(WR0.code())
                    ; mov [rbp - doff], Rd(WR0.code())
                );
                Ok(())
            }
            BinOp::And | BinOp::Or => {
                // §4.4: bitwise on 1-byte booleans, both sides always evaluated.
                let Some(asm) = self.asm.as_mut() else {
                    return Ok(());
                };
                dynasm!(asm
                    ; mov Rd(WR0.code()), [rbp - loff]
                    ; mov Rd(WR1.code()), [rbp - roff]
                );
                if op == BinOp::And {
                    dynasm!(asm ; and Rd(WR0.code()), Rd(WR1.code()));
                } else {
                    dynasm!(asm ; or Rd(WR0.code()), Rd(WR1.code()));
                }
                dynasm!(asm ; mov [rbp - doff], Rd(WR0.code()));
                Ok(())
            }
            _ => Err(CodeGenError::logic(format!("operator {op:?} is not defined for bool"), offset)),
        }
    }

    fn emit_ternary(&mut self, cond: &Expr, if_true: &Expr, if_false: &Expr, offset: usize) -> CgResult<(usize, Type)> {
        let (cslot, cty) = self.emit_expr(cond)?;
        if cty != Type::Bool {
            return Err(CodeGenError::logic(format!("ternary condition must be bool, got {cty}"), offset));
        }
        let coff = Self::offset(cslot);
        let else_label = self.new_label();
        let end_label = self.new_label();

        if let Some(asm) = self.asm.as_mut() {
            let else_label = else_label.unwrap();
            dynasm!(asm
                ; mov Rd(WR0.code()), [rbp - coff]
                ; test Rd(WR0.code()), Rd(WR0.code())
                ; jz => else_label
            );
        }

        let (tslot, tty) = self.emit_expr(if_true)?;
        let result = self.frame.temp_slot();
        self.copy_slot(tslot, result, tty);
        if let Some(asm) = self.asm.as_mut() {
            let end_label = end_label.unwrap();
            dynasm!(asm ; jmp => end_label);
        }
        if let Some(asm) = self.asm.as_mut() {
            let else_label = else_label.unwrap();
            dynasm!(asm ; => else_label);
        }
        let (fslot, fty) = self.emit_expr(if_false)?;
        if fty != tty {
            return Err(CodeGenError::logic(
                format!("ternary branches have different types ({tty} vs {fty}); casts are never implicit"),
                offset,
            ));
        }
        self.copy_slot(fslot, result, fty);
        if let Some(asm) = self.asm.as_mut() {
            let end_label = end_label.unwrap();
            dynasm!(asm ; => end_label);
        }
        Ok((result, tty))
    }

    // -- calls ------------------------------------------------------------

    fn emit_call(&mut self, name: &str, args: &[Expr], offset: usize) -> CgResult<(usize, Type)> {
        let (signature, call_kind) = if let Some(entry) = self.ctx.functions.get(name) {
            (entry.signature.clone(), CallKind::Compiled(entry.table_index))
        } else if let Some(native) = self.ctx.natives.get(name) {
            (native.signature.clone(), CallKind::Native(native.address))
        } else {
            return Err(CodeGenError::logic(format!("\"{name}\" is not a known function"), offset));
        };

        if args.len() != signature.params.len() {
            return Err(CodeGenError::logic(
                format!("\"{name}\" expects {} argument(s), got {}", signature.params.len(), args.len()),
                offset,
            ));
        }

        let mut arg_slots = Vec::with_capacity(args.len());
        for (arg, expected_ty) in args.iter().zip(signature.params.iter()) {
            let (slot, ty) = self.emit_expr(arg)?;
            if ty != *expected_ty {
                return Err(CodeGenError::logic(
                    format!("argument to \"{name}\" is {ty}, expected {expected_ty}"),
                    offset,
                ));
            }
            arg_slots.push(slot);
        }

        self.marshal_args_and_call(&arg_slots, &signature, call_kind, offset, name)
    }

    fn marshal_args_and_call(
        &mut self,
        arg_slots: &[usize],
        signature: &Signature,
        kind: CallKind,
        offset: usize,
        callee_name: &str,
    ) -> CgResult<(usize, Type)> {
        let mut gp_idx = 0usize;
        let mut xmm_idx = 0usize;
        for (slot, ty) in arg_slots.iter().zip(signature.params.iter()) {
            let off = Self::offset(*slot);
            if let Some(asm) = self.asm.as_mut() {
                match ty.operand_class() {
                    jit_core::types::OperandClass::Gp32 => {
                        match gp_idx {
                            0 => dynasm!(asm ; mov edi, [rbp - off]),
                            1 => dynasm!(asm ; mov esi, [rbp - off]),
                            _ => return Err(CodeGenError::logic("too many integer arguments".to_string(), offset)),
                        }
                        gp_idx += 1;
                    }
                    jit_core::types::OperandClass::Gp64 => {
                        match gp_idx {
                            0 => dynasm!(asm ; mov rdi, [rbp - off]),
                            1 => dynasm!(asm ; mov rsi, [rbp - off]),
                            _ => return Err(CodeGenError::logic("too many integer arguments".to_string(), offset)),
                        }
                        gp_idx += 1;
                    }
                    jit_core::types::OperandClass::XmmSingle => {
                        match xmm_idx {
                            0 => dynasm!(asm ; movss xmm0, [rbp - off]),
                            1 => dynasm!(asm ; movss xmm1, [rbp - off]),
                            _ => return Err(CodeGenError::logic("too many float arguments".to_string(), offset)),
                        }
                        xmm_idx += 1;
                    }
                    jit_core::types::OperandClass::XmmDouble => {
                        match xmm_idx {
                            0 => dynasm!(asm ; movsd xmm0, [rbp - off]),
                            1 => dynasm!(asm ; movsd xmm1, [rbp - off]),
                            _ => return Err(CodeGenError::logic("too many float arguments".to_string(), offset)),
                        }
                        xmm_idx += 1;
                    }
                }
            }
        }

        if let Some(asm) = self.asm.as_mut() {
            match kind {
                CallKind::Native(address) => {
                    let addr = address as i64;
                    dynasm!(asm ; mov Rq(WR0.code()), QWORD addr ; call Rq(WR0.code()));
                }
                CallKind::Compiled(table_index) => {
                    let slot_addr = self.ctx.function_table.slot_address(table_index) as i64;
                    dynasm!(asm
                        ; mov Rq(WR0.code()), QWORD slot_addr
                        ; mov Rq(WR0.code()), [Rq(WR0.code())]
                        ; call Rq(WR0.code())
                    );
                }
            }
        }

        if signature.return_type == Type::Void {
            let slot = self.frame.temp_slot();
            return Ok((slot, Type::Void));
        }

        let result = self.frame.temp_slot();
        let roff = Self::offset(result);
        if let Some(asm) = self.asm.as_mut() {
            match signature.return_type.operand_class() {
                jit_core::types::OperandClass::Gp32 => dynasm!(asm ; mov [rbp - roff], eax),
                jit_core::types::OperandClass::Gp64 => dynasm!(asm ; mov [rbp - roff], rax),
                jit_core::types::OperandClass::XmmSingle => dynasm!(asm ; movss [rbp - roff], xmm0),
                jit_core::types::OperandClass::XmmDouble => dynasm!(asm ; movsd [rbp - roff], xmm0),
            }
        }
        let _ = callee_name;
        Ok((result, signature.return_type))
    }

    // -- buffers ------------------------------------------------------------

    fn emit_index_read(&mut self, buffer: &str, index: &Expr, offset: usize) -> CgResult<(usize, Type)> {
        let (handle_slot, ty) = self.resolve_lvalue_readonly(buffer, offset)?;
        if ty != Type::Buffer {
            return Err(CodeGenError::logic(format!("\"{buffer}\" is not a buffer"), offset));
        }
        let (idx_slot, idx_ty) = self.emit_expr(index)?;
        if idx_ty != Type::Int {
            return Err(CodeGenError::logic("buffer index must be int".to_string(), offset));
        }

        let hoff = Self::offset(handle_slot);
        let ioff = Self::offset(idx_slot);
        let result = self.frame.temp_slot();
        let roff = Self::offset(result);

        if !self.ctx.safe_buffer_access {
            if let Some(asm) = self.asm.as_mut() {
                dynasm!(asm
                    ; mov Rq(WRB.code()), [rbp - hoff]
                    ; mov Rd(WR0.code()), [rbp - ioff]
                    ; movsxd Rq(WR0.code()), Rd(WR0.code())
                    ; mov Rq(WR1.code()), [Rq(WRB.code())]
                    ; movss Rx(XR0.code()), [Rq(WR1.code()) + Rq(WR0.code()) * 4]
                    ; movss [rbp - roff], Rx(XR0.code())
                );
            }
            return Ok((result, Type::Float));
        }

        let out_of_range = self.new_label();
        let done = self.new_label();
        if let Some(asm) = self.asm.as_mut() {
            let out_of_range = out_of_range.unwrap();
            let done = done.unwrap();
            dynasm!(asm
                ; mov Rq(WRB.code()), [rbp - hoff]
                ; mov Rd(WR0.code()), [rbp - ioff]
                ; movsxd Rq(WR0.code()), Rd(WR0.code())
                ; cmp Rq(WR0.code()), 0
                ; jl => out_of_range
                ; mov Rq(WR1.code()), [Rq(WRB.code()) + 8]
                ; cmp Rq(WR0.code()), Rq(WR1.code())
                ; jge => out_of_range
                ; mov Rq(WR1.code()), [Rq(WRB.code())]
                ; movss Rx(XR0.code()), [Rq(WR1.code()) + Rq(WR0.code()) * 4]
                ; movss [rbp - roff], Rx(XR0.code())
                ; jmp => done
                ; => out_of_range
            );
            self.emit_mark_overflow_call();
            let asm = self.asm.as_mut().unwrap();
            dynasm!(asm
                ; xorps Rx(XR0.code()), Rx(XR0.code())
                ; movss [rbp - roff], Rx(XR0.code())
                ; => done
            );
        }
        Ok((result, Type::Float))
    }

    fn emit_index_assign(&mut self, buffer: &str, index: &Expr, op: AssignOp, value: &Expr, offset: usize) -> CgResult<()> {
        let (handle_slot, ty) = self.resolve_lvalue_readonly(buffer, offset)?;
        if ty != Type::Buffer {
            return Err(CodeGenError::logic(format!("\"{buffer}\" is not a buffer"), offset));
        }
        let (idx_slot, idx_ty) = self.emit_expr(index)?;
        if idx_ty != Type::Int {
            return Err(CodeGenError::logic("buffer index must be int".to_string(), offset));
        }
        let (vslot, vty) = self.emit_expr(value)?;
        if vty != Type::Float {
            return Err(CodeGenError::logic("buffer elements are float".to_string(), offset));
        }

        let hoff = Self::offset(handle_slot);
        let ioff = Self::offset(idx_slot);
        let voff = Self::offset(vslot);

        // compute the new value to store: for plain `=`, it's just `vslot`;
        // for `op=`, read the current element first, combine, then store.
        let compute_new_value = |this: &mut Self, data_ptr_loaded: bool| -> CgResult<()> {
            let _ = data_ptr_loaded;
            if op == AssignOp::Assign {
                if let Some(asm) = this.asm.as_mut() {
                    dynasm!(asm ; movss Rx(XR0.code()), [rbp - voff]);
                }
                return Ok(());
            }
            let binop = match op {
                AssignOp::AddAssign => BinOp::Add,
                AssignOp::SubAssign => BinOp::Sub,
                AssignOp::MulAssign => BinOp::Mul,
                AssignOp::DivAssign => BinOp::Div,
                AssignOp::RemAssign => {
                    return Err(CodeGenError::logic("% is only defined for int".to_string(), offset));
                }
                AssignOp::Assign => unreachable!(),
            };
            if let Some(asm) = this.asm.as_mut() {
                // current element value is already loaded into XR1 by the
                // caller just before this closure runs.
                dynasm!(asm ; movss Rx(XR0.code()), [rbp - voff]);
                match binop {
                    BinOp::Add => dynasm!(asm ; addss Rx(XR1.code()), Rx(XR0.code())),
                    BinOp::Sub => dynasm!(asm ; movss Rx(XR0.code()), [rbp - voff] ; subss Rx(XR1.code()), Rx(XR0.code())),
                    BinOp::Mul => dynasm!(asm ; mulss Rx(XR1.code()), Rx(XR0.code())),
                    BinOp::Div => dynasm!(asm ; movss Rx(XR0.code()), [rbp - voff] ; divss Rx(XR1.code()), Rx(XR0.code())),
                    _ => unreachable!(),
                }
                dynasm!(asm ; movss Rx(XR0.code()), Rx(XR1.code()));
            }
            Ok(())
        };

        if !self.ctx.safe_buffer_access {
            if let Some(asm) = self.asm.as_mut() {
                dynasm!(asm
                    ; mov Rq(WRB.code()), [rbp - hoff]
                    ; mov Rd(WR0.code()), [rbp - ioff]
                    ; movsxd Rq(WR0.code()), Rd(WR0.code())
                    ; mov Rq(WR1.code()), [Rq(WRB.code())]
                );
                if op != AssignOp::Assign {
                    dynasm!(asm ; movss Rx(XR1.code()), [Rq(WR1.code()) + Rq(WR0.code()) * 4]);
                }
            }
            compute_new_value(self, true)?;
            if let Some(asm) = self.asm.as_mut() {
                dynasm!(asm ; movss [Rq(WR1.code()) + Rq(WR0.code()) * 4], Rx(XR0.code()));
            }
            return Ok(());
        }

        let out_of_range = self.new_label();
        let done = self.new_label();
        if let Some(asm) = self.asm.as_mut() {
            let out_of_range = out_of_range.unwrap();
            dynasm!(asm
                ; mov Rq(WRB.code()), [rbp - hoff]
                ; mov Rd(WR0.code()), [rbp - ioff]
                ; movsxd Rq(WR0.code()), Rd(WR0.code())
                ; cmp Rq(WR0.code()), 0
                ; jl => out_of_range
                ; mov Rq(WR1.code()), [Rq(WRB.code()) + 8]
                ; cmp Rq(WR0.code()), Rq(WR1.code())
                ; jge => out_of_range
                ; mov Rq(WR1.code()), [Rq(WRB.code())]
            );
            if op != AssignOp::Assign {
                dynasm!(asm ; movss Rx(XR1.code()), [Rq(WR1.code()) + Rq(WR0.code()) * 4]);
            }
        }
        compute_new_value(self, true)?;
        if let Some(asm) = self.asm.as_mut() {
            let done = done.unwrap();
            let out_of_range = out_of_range.unwrap();
            dynasm!(asm
                ; movss [Rq(WR1.code()) + Rq(WR0.code()) * 4], Rx(XR0.code())
                ; jmp => done
                ; => out_of_range
            );
            self.emit_mark_overflow_call();
            let asm = self.asm.as_mut().unwrap();
            dynasm!(asm ; => done);
        }
        Ok(())
    }

    /// Emits `jit_buffer_mark_overflow(WRB, WR0 as i32)`. Expects the
    /// handle pointer in `WRB` and the (already sign-extended, possibly
    /// out-of-range) index in the low 32 bits of `WR0`.
    fn emit_mark_overflow_call(&mut self) {
        let Some(asm) = self.asm.as_mut() else {
            return;
        };
        let addr = jit_core::buffer::jit_buffer_mark_overflow as usize as i64;
        dynasm!(asm
            ; mov rdi, Rq(WRB.code())
            ; mov esi, Rd(WR0.code())
            ; mov Rq(WR1.code()), QWORD addr
            ; call Rq(WR1.code())
        );
    }

    fn emit_buffer_method_call(&mut self, target: &str, method: &str, args: &[Expr], offset: usize) -> CgResult<()> {
        self.emit_method_call_expr(target, method, args, offset).map(|_| ())
    }

    fn emit_method_call_expr(&mut self, target: &str, method: &str, args: &[Expr], offset: usize) -> CgResult<(usize, Type)> {
        if method != "setSize" {
            return Err(CodeGenError::logic(format!("buffer method \"{method}\" is not supported"), offset));
        }
        if args.len() != 1 {
            return Err(CodeGenError::logic("setSize takes exactly one argument".to_string(), offset));
        }
        let (handle_slot, ty) = self.resolve_lvalue_readonly(target, offset)?;
        if ty != Type::Buffer {
            return Err(CodeGenError::logic(format!("\"{target}\" is not a buffer"), offset));
        }
        let (arg_slot, arg_ty) = self.emit_expr(&args[0])?;
        if arg_ty != Type::Int {
            return Err(CodeGenError::logic("setSize argument must be int".to_string(), offset));
        }
        let hoff = Self::offset(handle_slot);
        let aoff = Self::offset(arg_slot);
        if let Some(asm) = self.asm.as_mut() {
            let addr = jit_core::buffer::jit_buffer_set_size as usize as i64;
            dynasm!(asm
                ; mov rdi, [rbp - hoff]
                ; mov esi, [rbp - aoff]
                ; mov Rq(WR0.code()), QWORD addr
                ; call Rq(WR0.code())
            );
        }
        let dummy = self.frame.temp_slot();
        Ok((dummy, Type::Void))
    }

    fn resolve_lvalue_readonly(&mut self, name: &str, offset: usize) -> CgResult<(usize, Type)> {
        if let Some((slot, ty, _is_const)) = self.frame.lookup(name) {
            return Ok((slot, ty));
        }
        self.ensure_global_loaded(name, offset)
    }
}

enum CallKind {
    Native(usize),
    Compiled(usize),
}
