//! Instruction instances: a prototype bound to value arguments.

use smallvec::SmallVec;

use crate::proto::Prototype;
use crate::tag::ValueTag;
use crate::types::Type;

/// Argument list storage; most instructions bind at most four values.
pub type ArgumentList = SmallVec<[ValueTag; 4]>;

/// An instantiated prototype.
///
/// An instruction carries no identity of its own; it becomes addressable
/// only once a graph stores it under an owning [`ValueTag`].
#[derive(Clone, PartialEq, Eq)]
pub struct Instruction {
    proto: Prototype,
    args: ArgumentList,
}

impl Instruction {
    /// Bind a prototype to its arguments.
    pub fn new(proto: Prototype, args: impl IntoIterator<Item = ValueTag>) -> Self {
        Self {
            proto,
            args: args.into_iter().collect(),
        }
    }

    /// The shared prototype.
    #[inline]
    pub fn prototype(&self) -> &Prototype {
        &self.proto
    }

    /// The bound arguments, in declaration order.
    #[inline]
    pub fn arguments(&self) -> &[ValueTag] {
        &self.args
    }

    /// The type of the value this instruction produces.
    #[inline]
    pub fn result_type(&self) -> Type {
        self.proto.result_type()
    }

    /// Same prototype, different arguments.
    pub fn with_arguments(&self, args: impl IntoIterator<Item = ValueTag>) -> Instruction {
        Instruction::new(self.proto.clone(), args)
    }

    /// Rewrite every argument through `mapper`.
    pub fn map_arguments(&self, mapper: &mut dyn FnMut(&ValueTag) -> ValueTag) -> Instruction {
        Instruction {
            proto: self.proto.clone(),
            args: self.args.iter().map(|a| mapper(a)).collect(),
        }
    }
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.proto)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagAllocator;
    use crate::types::Type;

    #[test]
    fn arguments_preserve_order() {
        let alloc = TagAllocator::new();
        let a = alloc.value("a");
        let b = alloc.value("b");
        let instr = Instruction::new(
            Prototype::store(Type::int32()),
            [a.clone(), b.clone()],
        );
        assert_eq!(instr.arguments(), &[a, b]);
    }

    #[test]
    fn map_arguments_rewrites_in_place() {
        let alloc = TagAllocator::new();
        let a = alloc.value("a");
        let b = alloc.value("b");
        let instr = Instruction::new(Prototype::copy(Type::int32()), [a.clone()]);
        let rewritten = instr.map_arguments(&mut |t| if *t == a { b.clone() } else { t.clone() });
        assert_eq!(rewritten.arguments(), &[b]);
        assert_eq!(rewritten.prototype(), instr.prototype());
    }
}
