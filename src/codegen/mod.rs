//! AST to symbolic instructions.
//!
//! Every expression leaves exactly one value on the stack, except a toplevel
//! print, which consumes its own. Jump targets are [`Label`]s minted by the
//! [`Codegen`] for this compilation only; [`crate::asm::assemble`] resolves them.

use crate::asm::{Item, Label, Opcode, Operand, Symbolic};
use crate::ast::*;

/// What happens to the value of each toplevel expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toplevel {
    /// Discard every value, so a finished program leaves an empty stack.
    Discard,
    /// Discard all values except the last one.
    KeepLast,
}

pub fn generate(program: &Program, mode: Toplevel) -> Vec<Item> {
    let mut cg = Codegen::new();
    cg.program(program, mode);
    cg.finish()
}

#[derive(Debug, Default)]
pub struct Codegen {
    next_label: u32,
    out: Vec<Item>,
}

impl Codegen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<Item> {
        self.out
    }

    fn fresh_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn place(&mut self, label: Label) {
        self.out.push(Item::Label(label));
    }

    fn emit(&mut self, op: Opcode) {
        self.emit_with(op, Operand::None);
    }

    fn emit_with(&mut self, op: Opcode, operand: Operand) {
        self.out.push(Item::Instr(Symbolic { op, operand }));
    }

    pub fn program(&mut self, program: &Program, mode: Toplevel) {
        let last = program.body.len().saturating_sub(1);
        for (i, expr) in program.body.iter().enumerate() {
            self.expr(expr, false);
            let keep = mode == Toplevel::KeepLast && i == last;
            if !keep && !matches!(expr, Expr::Print { .. }) {
                self.emit(Opcode::Pop);
            }
        }
    }

    /// `nested` is false only for expressions sitting directly in the program body.
    fn expr(&mut self, expr: &Expr, nested: bool) {
        match expr {
            Expr::Print { target, value } => {
                self.expr(value, true);
                if nested {
                    self.emit_with(Opcode::Dup, Operand::Int(1));
                }
                match target {
                    Some(r) => {
                        self.coordinates(r);
                        self.emit(Opcode::FPrint);
                    }
                    None => self.emit(Opcode::Print),
                }
            }
            Expr::Close { handle } => {
                self.coordinates(handle);
                self.emit(Opcode::Close);
            }
            Expr::If { clauses, otherwise } => {
                let end = self.fresh_label();
                for clause in clauses {
                    let next = self.fresh_label();
                    self.expr(&clause.condition, true);
                    self.emit_with(Opcode::Jmpz, Operand::Label(next));
                    self.expr(&clause.then, true);
                    self.emit_with(Opcode::Jmp, Operand::Label(end));
                    self.place(next);
                }
                match otherwise {
                    Some(e) => self.expr(e, true),
                    None => self.emit_with(Opcode::Push, Operand::Num(0.0)),
                }
                self.place(end);
            }
            Expr::Store { source, target } => self.store(source, target.as_ref()),
        }
    }

    fn store(&mut self, source: &Source, target: Option<&Reference>) {
        match source {
            Source::Math(m) => self.math(m),
            Source::Prompt => self.emit(Opcode::Read),
            Source::FileRead(r) => {
                self.coordinates(r);
                self.emit(Opcode::FRead);
            }
            Source::OpenRead(path) | Source::OpenWrite(path) => {
                self.math(path);
                // The parser guarantees an open always names its handle.
                if let Some(r) = target {
                    self.coordinates(r);
                }
                let op = if matches!(source, Source::OpenRead(_)) { Opcode::OpenR } else { Opcode::OpenW };
                self.emit(op);
                return;
            }
        }
        if let Some(r) = target {
            self.coordinates(r);
            self.emit(Opcode::PopV);
        }
    }

    fn math(&mut self, math: &Math) {
        match math {
            Math::Value(v) => self.value(v, true),
            Math::Unary { op, operand } => {
                self.value(operand, true);
                match op {
                    UnaryOp::Negate => self.emit(Opcode::Neg),
                    UnaryOp::Fold => self.emit(Opcode::Sum),
                }
            }
            Math::Binary { op, lhs, rhs } => {
                self.math(lhs);
                self.math(rhs);
                self.emit(match op {
                    BinOp::And => Opcode::And,
                    BinOp::Or => Opcode::Or,
                    BinOp::Add => Opcode::Add,
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                    BinOp::Mod => Opcode::Mod,
                });
            }
        }
    }

    /// With `reduce`, a dice pool is folded to its sum (or left as the crit count).
    fn value(&mut self, v: &Value, reduce: bool) {
        let mods = &v.modifiers;
        // A group around a pool hands the dice through when something outside
        // still needs them: its own modifiers, or an enclosing group's.
        let passthrough = match &v.base {
            Base::Atom(Atom::Group(inner)) if !mods.is_empty() || !reduce => inner.as_pool(),
            _ => None,
        };

        match &v.base {
            Base::Dice { count, sides } => {
                self.scalar(sides);
                if mods.repeat.is_some() {
                    self.emit_with(Opcode::Dup, Operand::Int(1));
                }
                self.scalar(count);
                self.emit(Opcode::Roll);
            }
            Base::Atom(atom) => match passthrough {
                Some(pool) => self.value(pool, false),
                None => self.atom(atom),
            },
            Base::Load(r) => {
                self.coordinates(r);
                self.emit(Opcode::PushV);
            }
            Base::List(items) => {
                for item in items {
                    self.expr(item, true);
                }
                self.emit_with(Opcode::MList, Operand::Int(items.len() as i64));
            }
        }

        self.modifiers(mods);

        let is_pool = matches!(v.base, Base::Dice { .. }) || passthrough.is_some();
        if reduce && is_pool && mods.crit.is_none() {
            self.emit(Opcode::Sum);
        }
    }

    /// Repeat only follows a direct roll, whose `DUP 1` left the die size under the pool.
    fn modifiers(&mut self, mods: &Modifiers) {
        if let Some(order) = mods.sort {
            self.emit(match order {
                SortOrder::Ascending => Opcode::SortA,
                SortOrder::Descending => Opcode::SortD,
            });
        }
        if let Some(sel) = &mods.select {
            self.atom(&sel.count);
            self.emit(match sel.mode {
                SelectMode::KeepHigh => Opcode::Kh,
                SelectMode::KeepLow => Opcode::Kl,
                SelectMode::KeepFront => Opcode::Kf,
                SelectMode::KeepRear => Opcode::Kr,
                SelectMode::DiscardHigh => Opcode::Dh,
                SelectMode::DiscardLow => Opcode::Dl,
                SelectMode::DiscardFront => Opcode::Df,
                SelectMode::DiscardRear => Opcode::Dr,
            });
        }
        if let Some(repeat) = &mods.repeat {
            self.atom(&repeat.when.threshold);
            self.emit(match (repeat.once, repeat.when.op) {
                (false, CompareOp::Greater) => Opcode::RrGt,
                (false, CompareOp::Less) => Opcode::RrLt,
                (false, CompareOp::Equal) => Opcode::RrEq,
                (true, CompareOp::Greater) => Opcode::RoGt,
                (true, CompareOp::Less) => Opcode::RoLt,
                (true, CompareOp::Equal) => Opcode::RoEq,
            });
        }
        if let Some(crit) = &mods.crit {
            self.atom(&crit.threshold);
            self.emit(match crit.op {
                CompareOp::Greater => Opcode::CcGt,
                CompareOp::Less => Opcode::CcLt,
                CompareOp::Equal => Opcode::CcEq,
            });
        }
    }

    fn atom(&mut self, atom: &Atom) {
        match atom {
            Atom::Number(n) => self.emit_with(Opcode::Push, Operand::Num(*n)),
            Atom::Group(e) => self.expr(e, true),
        }
    }

    /// An atom folded to a single number; literals need no fold.
    fn scalar(&mut self, atom: &Atom) {
        self.atom(atom);
        if let Atom::Group(_) = atom {
            self.emit(Opcode::Sum);
        }
    }

    /// Pushes sides then count; the consuming opcode pops them as a `Reference`.
    fn coordinates(&mut self, r: &Reference) {
        self.scalar(&r.sides);
        self.scalar(&r.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::listing;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn gen_listing(src: &str) -> String {
        let program = parse(tokenize(src)).unwrap();
        listing(&generate(&program, Toplevel::Discard))
    }

    fn lines(text: &str) -> Vec<&str> {
        text.lines().map(str::trim).collect()
    }

    #[test]
    fn toplevel_values_are_discarded() {
        assert_eq!(lines(&gen_listing("1 + 2")), ["PUSH 1", "PUSH 2", "ADD", "POP"]);
    }

    #[test]
    fn toplevel_print_is_not_popped() {
        assert_eq!(lines(&gen_listing("!3")), ["PUSH 3", "PRINT"]);
    }

    #[test]
    fn nested_print_keeps_its_value() {
        assert_eq!(lines(&gen_listing("[!3]")), ["PUSH 3", "DUP 1", "PRINT", "MLIST 1", "POP"]);
    }

    #[test]
    fn keep_last_leaves_final_value() {
        let program = parse(tokenize("1 2")).unwrap();
        let text = listing(&generate(&program, Toplevel::KeepLast));
        assert_eq!(lines(&text), ["PUSH 1", "POP", "PUSH 2"]);
    }

    #[test]
    fn dice_roll_is_summed() {
        assert_eq!(lines(&gen_listing("2d6")), ["PUSH 6", "PUSH 2", "ROLL", "SUM", "POP"]);
    }

    #[test]
    fn grouped_dice_sizes_are_folded() {
        assert_eq!(
            lines(&gen_listing("(1d4)d6")),
            ["PUSH 6", "PUSH 4", "PUSH 1", "ROLL", "SUM", "SUM", "ROLL", "SUM", "POP"]
        );
    }

    #[test]
    fn modifiers_emit_in_fixed_order() {
        assert_eq!(
            lines(&gen_listing("4d6sdkh3r1>4")),
            [
                "PUSH 6", "DUP 1", "PUSH 4", "ROLL", "SORTD", "PUSH 3", "KH", "PUSH 1", "RREQ", "PUSH 4",
                "CCGT", "POP",
            ]
        );
    }

    #[test]
    fn pooled_group_keeps_individual_dice() {
        assert_eq!(
            lines(&gen_listing("(2d10)kh(1)")),
            ["PUSH 10", "PUSH 2", "ROLL", "PUSH 1", "KH", "SUM", "POP"]
        );
    }

    #[test]
    fn nested_groups_keep_individual_dice() {
        assert_eq!(
            lines(&gen_listing("((2d10))kh(1)")),
            ["PUSH 10", "PUSH 2", "ROLL", "PUSH 1", "KH", "SUM", "POP"]
        );
        assert_eq!(
            lines(&gen_listing("((2d10)s)kh(1)")),
            ["PUSH 10", "PUSH 2", "ROLL", "SORTA", "PUSH 1", "KH", "SUM", "POP"]
        );
    }

    #[test]
    fn unmodified_group_is_summed() {
        assert_eq!(lines(&gen_listing("(2d10)")), ["PUSH 10", "PUSH 2", "ROLL", "SUM", "POP"]);
    }

    #[test]
    fn conditional_uses_fresh_labels() {
        assert_eq!(
            lines(&gen_listing("{1,2|0}")),
            [
                "PUSH 1", "JMPZ :L1", "PUSH 2", "JMP :L0", ":L1", "PUSH 0", ":L0", "POP",
            ]
        );
    }

    #[test]
    fn conditional_without_else_yields_zero() {
        let text = gen_listing("{0,2}");
        assert!(lines(&text).contains(&"PUSH 0"));
    }

    #[test]
    fn store_and_load_push_coordinates() {
        assert_eq!(
            lines(&gen_listing("5@1d2 &1d2")),
            ["PUSH 5", "PUSH 2", "PUSH 1", "POPV", "POP", "PUSH 2", "PUSH 1", "PUSHV", "POP"]
        );
    }

    #[test]
    fn file_operations_use_reference_keys() {
        assert_eq!(
            lines(&gen_listing("v5@1d1 !|&1d1 7 |&1d1")),
            [
                "PUSH 5", "PUSH 1", "PUSH 1", "OPENW", "POP", "PUSH 7", "PUSH 1", "PUSH 1", "FPRINT",
                "PUSH 1", "PUSH 1", "CLOSE", "POP",
            ]
        );
    }

    #[test]
    fn labels_restart_per_compilation() {
        let first = gen_listing("{1,2|3}");
        let second = gen_listing("{1,2|3}");
        assert_eq!(first, second);
    }
}
