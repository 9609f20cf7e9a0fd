//! Structural isomorphism of PO cones. Hashing proposes classes; every member
//! is then confirmed against its representative by an explicit bijection.

use crate::abc::aiger::{Aig, AigNode, lit_neg, lit_var};
use std::{
    collections::HashMap,
    hash::{DefaultHasher, Hash, Hasher},
};

const ROUNDS: usize = 8;

fn hash_of(v: impl Hash) -> u64 {
    let mut h = DefaultHasher::new();
    v.hash(&mut h);
    h.finish()
}

/// Refined labels per variable.
fn labels(aig: &Aig, nodes: &[AigNode]) -> Vec<u64> {
    let mut label: Vec<u64> = nodes
        .iter()
        .map(|n| match n {
            AigNode::Const => hash_of(0u8),
            AigNode::Input(_) => hash_of(1u8),
            AigNode::Latch(i) => hash_of((2u8, aig.latchs[*i].init)),
            AigNode::And(..) => hash_of(3u8),
        })
        .collect();
    let lit = |label: &[u64], l: u32| hash_of((label[lit_var(l) as usize], lit_neg(l)));
    for _ in 0..ROUNDS {
        let next: Vec<u64> = nodes
            .iter()
            .enumerate()
            .map(|(v, n)| match n {
                AigNode::Const | AigNode::Input(_) => label[v],
                AigNode::Latch(i) => hash_of((label[v], lit(&label, aig.latchs[*i].next))),
                AigNode::And(a, b) => {
                    let (x, y) = (lit(&label, *a), lit(&label, *b));
                    hash_of((label[v], x.min(y), x.max(y)))
                }
            })
            .collect();
        label = next;
    }
    label
}

struct Matcher<'a> {
    aig: &'a Aig,
    nodes: &'a [AigNode],
    label: &'a [u64],
    fwd: HashMap<u32, u32>,
    bwd: HashMap<u32, u32>,
}

impl Matcher<'_> {
    /// Extends the bijection with `a -> b` and everything below them.
    fn matches(&mut self, a: u32, b: u32) -> bool {
        let mut work = vec![(a, b)];
        while let Some((a, b)) = work.pop() {
            if lit_neg(a) != lit_neg(b) {
                return false;
            }
            let (va, vb) = (lit_var(a), lit_var(b));
            match (self.fwd.get(&va), self.bwd.get(&vb)) {
                (Some(x), Some(y)) if *x == vb && *y == va => continue,
                (None, None) => (),
                _ => return false,
            }
            self.fwd.insert(va, vb);
            self.bwd.insert(vb, va);
            match (self.nodes[va as usize], self.nodes[vb as usize]) {
                (AigNode::Const, AigNode::Const) => (),
                (AigNode::Input(_), AigNode::Input(_)) => (),
                (AigNode::Latch(i), AigNode::Latch(j)) => {
                    let (la, lb) = (&self.aig.latchs[i], &self.aig.latchs[j]);
                    if la.init != lb.init {
                        return false;
                    }
                    work.push((la.next, lb.next));
                }
                (AigNode::And(a0, a1), AigNode::And(b0, b1)) => {
                    let l = |x: u32| self.label[lit_var(x) as usize];
                    if l(a0) == l(b0) && l(a1) == l(b1) {
                        work.push((a0, b0));
                        work.push((a1, b1));
                    } else {
                        work.push((a0, b1));
                        work.push((a1, b0));
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

/// Classes of structurally isomorphic POs. Each class is sorted and its
/// first member is the representative; classes are ordered by
/// representative. Networks with constraints get singleton classes.
pub fn po_classes(aig: &Aig) -> Vec<Vec<usize>> {
    let props = aig.properties();
    if !aig.constraints.is_empty() {
        return (0..props.len()).map(|i| vec![i]).collect();
    }
    let nodes = aig.nodes();
    let label = labels(aig, &nodes);
    let mut by_sig: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, l) in props.iter().enumerate() {
        let sig = hash_of((label[lit_var(*l) as usize], lit_neg(*l)));
        by_sig.entry(sig).or_default().push(i);
    }
    let mut classes = Vec::new();
    for mut group in by_sig.into_values() {
        group.sort_unstable();
        while let Some(&rep) = group.first() {
            let mut class = vec![rep];
            let mut rest = Vec::new();
            for &po in &group[1..] {
                let mut m = Matcher {
                    aig,
                    nodes: &nodes,
                    label: &label,
                    fwd: HashMap::new(),
                    bwd: HashMap::new(),
                };
                if m.matches(props[rep], props[po]) {
                    class.push(po);
                } else {
                    rest.push(po);
                }
            }
            classes.push(class);
            group = rest;
        }
    }
    classes.sort_unstable_by_key(|c| c[0]);
    classes
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::abc::aiger::{AigAnd, AigLatch};

    /// Cone shapes over a fresh input and latch.
    #[derive(Clone, Copy)]
    pub(crate) enum Shape {
        Delay,
        Gated,
        DelayOne,
        GatedInv,
    }

    pub(crate) fn add_cone(aig: &mut Aig, shape: Shape) -> u32 {
        let input = aig.max_var + 1;
        let latch = aig.max_var + 2;
        aig.max_var += 2;
        aig.inputs.push(input);
        let init = Some(matches!(shape, Shape::DelayOne));
        aig.latchs.push(AigLatch {
            var: latch,
            next: input * 2,
            init,
        });
        let out = match shape {
            Shape::Delay | Shape::DelayOne => latch * 2,
            Shape::Gated | Shape::GatedInv => {
                aig.max_var += 1;
                let l = if matches!(shape, Shape::GatedInv) {
                    latch * 2 + 1
                } else {
                    latch * 2
                };
                aig.ands.push(AigAnd {
                    lhs: aig.max_var * 2,
                    rhs0: l,
                    rhs1: input * 2,
                });
                aig.max_var * 2
            }
        };
        aig.outputs.push(out);
        out
    }

    #[test]
    fn copies_of_a_cone_share_a_class() {
        let mut aig = Aig::default();
        for s in [Shape::Gated, Shape::Delay, Shape::Gated, Shape::Delay] {
            add_cone(&mut aig, s);
        }
        assert_eq!(po_classes(&aig), vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn init_values_and_polarity_separate_classes() {
        let mut aig = Aig::default();
        for s in [Shape::Delay, Shape::DelayOne, Shape::Gated, Shape::GatedInv] {
            add_cone(&mut aig, s);
        }
        assert_eq!(po_classes(&aig).len(), 4);
    }

    #[test]
    fn shared_output_literal_is_isomorphic() {
        let mut aig = Aig::default();
        let out = add_cone(&mut aig, Shape::Gated);
        aig.outputs.push(out);
        assert_eq!(po_classes(&aig), vec![vec![0, 1]]);
        aig.constraints.push(2);
        assert_eq!(po_classes(&aig).len(), 2);
    }
}
