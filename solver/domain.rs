//! Unassigned atoms as a sparse set with reversible memory
//! (Knuth §7.2.2.3, Christmas Lecture 2023). Deleting an atom
//! assigns it; restoring the set to an earlier size undoes every
//! assignment made since, in reverse order.

use std::fmt;

use horizon_syntax::Atom;

/// A set of atoms whose deletions can be undone in bulk.
pub trait Domain {
    /// Is `x` still present?
    fn contains(&self, x: Atom) -> bool;

    /// Delete `x`; `false` if it was already gone.
    fn delete(&mut self, x: Atom) -> bool;

    /// The elements deleted since the domain had size `n`,
    /// most recent first.
    fn deleted(&self, n: usize) -> &[Atom];

    /// Grow back to size `n` by undeleting the most recent deletions.
    /// Fails if the set never held `n` atoms.
    fn restore(&mut self, n: usize) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Some current element, if any.
    fn first(&self) -> Option<Atom>;
}

/// A sparse set of the atoms `1..=max`.
pub struct SparseAtomSet {
    /// Present atoms in `dom[..len]`, deleted ones after them.
    dom: Vec<Atom>,

    /// Position of each atom in `dom`.
    map: Vec<usize>,

    len: usize,
}

impl SparseAtomSet {
    pub fn new(max: Atom) -> Self {
        let dom = (1..=max).collect::<Vec<Atom>>();
        let mut map = vec![usize::MAX; max as usize + 1];
        for (i, &x) in dom.iter().enumerate() {
            map[x as usize] = i;
        }
        let len = dom.len();
        Self { dom, map, len }
    }

    fn index(&self, x: Atom) -> Option<usize> {
        self.map.get(x as usize).copied().filter(|&i| i != usize::MAX)
    }
}

impl fmt::Debug for SparseAtomSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.dom[0..self.len].iter()).finish()
    }
}

impl Domain for SparseAtomSet {
    fn contains(&self, x: Atom) -> bool {
        self.index(x).map(|i| i < self.len).unwrap_or(false)
    }

    fn delete(&mut self, x: Atom) -> bool {
        match self.index(x) {
            Some(i) if i < self.len => {
                self.len -= 1;
                let j = self.len;
                self.dom.swap(i, j);
                let y = self.dom[i];
                self.map[x as usize] = j;
                self.map[y as usize] = i;
                true
            }
            _ => false,
        }
    }

    fn deleted(&self, n: usize) -> &[Atom] {
        &self.dom[self.len..n.min(self.dom.len())]
    }

    fn restore(&mut self, n: usize) -> bool {
        if n <= self.dom.len() {
            self.len = n;
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn first(&self) -> Option<Atom> {
        self.dom[..self.len].first().copied()
    }
}
