//! Locomotive function state, grouped into the banks sent on the wire

use dcc_core::{nmra, DccResult};
use std::collections::HashMap;

/// A group of up to 8 functions sent together in one function frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionBank {
    /// Added to [`FUNCTION_GROUP`](crate::messages::FUNCTION_GROUP) in the frame header
    pub offset: u8,
    first: u8,
    last: u8,
}

const BANKS: [FunctionBank; 5] = [
    FunctionBank { offset: 0x00, first: 0, last: 4 },
    FunctionBank { offset: 0x01, first: 5, last: 8 },
    FunctionBank { offset: 0x02, first: 9, last: 12 },
    FunctionBank { offset: 0x03, first: 13, last: 20 },
    FunctionBank { offset: 0x08, first: 21, last: 28 },
];

impl FunctionBank {
    /// Bank holding `function`
    ///
    /// # Errors
    /// Validation error if `function` is not 0 to 28
    pub fn for_function(function: u8) -> DccResult<Self> {
        nmra::ensure_function(function)?;
        Ok(BANKS
            .iter()
            .copied()
            .find(|bank| function <= bank.last)
            .unwrap_or(BANKS[BANKS.len() - 1]))
    }

    /// Bit of `function` inside this bank's bitmask
    ///
    /// F0 (the light) sits above F1 to F4 in the first bank.
    pub fn bit(&self, function: u8) -> u8 {
        match function {
            0 => 0x10,
            1..=4 => 1 << (function - 1),
            _ => 1 << (function - self.first),
        }
    }

    /// Bitmask of this bank from the full set of function states
    pub fn bitmask(&self, functions: u32) -> u8 {
        (self.first..=self.last)
            .filter(|f| functions & (1 << f) != 0)
            .fold(0, |mask, f| mask | self.bit(f))
    }
}

/// Per-locomotive function states
///
/// A locomotive's entry is created the first time one of its functions is
/// touched, with every function off.
#[derive(Debug, Default)]
pub struct FunctionLatchBank {
    locos: HashMap<u16, u32>,
}

impl FunctionLatchBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded function states of `address`, one bit per function
    pub fn state(&self, address: u16) -> u32 {
        self.locos.get(&address).copied().unwrap_or(0)
    }

    /// Record the changes of a committed batch
    pub fn commit(&mut self, pending: PendingLatches) {
        for (address, change) in pending.locos {
            let state = self.locos.entry(address).or_default();
            *state = change.apply(*state);
        }
    }

    /// Whether `function` of `address` is currently on
    pub fn is_on(&self, address: u16, function: u8) -> bool {
        self.locos
            .get(&address)
            .is_some_and(|state| function < 32 && state & (1 << function) != 0)
    }

    /// Number of locomotives with recorded state
    pub fn len(&self) -> usize {
        self.locos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locos.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LatchChange {
    set: u32,
    clear: u32,
}

impl LatchChange {
    fn apply(&self, state: u32) -> u32 {
        (state & !self.clear) | self.set
    }
}

/// Function changes queued in one batch, not yet sent to the decoder
///
/// Only the touched functions are recorded, so committing never overwrites
/// changes made by another batch in the meantime.
#[derive(Debug, Default)]
pub struct PendingLatches {
    locos: HashMap<u16, LatchChange>,
}

impl PendingLatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue switching `function` of `address` on or off
    ///
    /// `current` is the recorded state of `address` before this batch.
    ///
    /// # Returns
    /// The bank containing `function` and that bank's full bitmask with every
    /// change queued so far applied
    pub fn stage(
        &mut self,
        current: u32,
        address: u16,
        function: u8,
        on: bool,
    ) -> DccResult<(FunctionBank, u8)> {
        let bank = FunctionBank::for_function(function)?;
        let change = self.locos.entry(address).or_default();
        let bit = 1 << function;
        if on {
            change.set |= bit;
            change.clear &= !bit;
        } else {
            change.clear |= bit;
            change.set &= !bit;
        }
        Ok((bank, bank.bitmask(change.apply(current))))
    }

    pub fn is_empty(&self) -> bool {
        self.locos.is_empty()
    }
}
