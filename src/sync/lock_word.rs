use easy_bitfield::{BitField, BitFieldTrait, FromBitfield, ToBitfield};
use num_traits::{FromPrimitive, ToPrimitive};

use crate::threads::ThreadId;

/// Low tag bits of a lock word. `ThinOrUnlocked` must encode as zero so that
/// freshly zero-initialized object headers read as unlocked.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum LockTag {
    ThinOrUnlocked = 0,
    Fat = 1,
}

impl<S: FromPrimitive> ToBitfield<S> for LockTag {
    fn one() -> Self {
        unreachable!()
    }

    fn zero() -> Self {
        unreachable!()
    }

    fn to_bitfield(self) -> S {
        S::from_u8(self as u8).unwrap()
    }
}

impl<S: ToPrimitive> FromBitfield<S> for LockTag {
    fn from_bitfield(value: S) -> Self {
        match value.to_u8().unwrap() {
            0 => Self::ThinOrUnlocked,
            1 => Self::Fat,
            _ => {
                #[cfg(debug_assertions)]
                {
                    unreachable!("invalid lock tag")
                }

                #[cfg(not(debug_assertions))]
                unsafe {
                    std::hint::unreachable_unchecked();
                }
            }
        }
    }

    fn from_i64(_value: i64) -> Self {
        unreachable!()
    }
}

pub type TagBitfield = BitField<usize, LockTag, 0, 2, false>;
pub type ThinOwnerBitfield = BitField<usize, u32, { TagBitfield::NEXT_BIT }, 16, false>;
pub type ThinCountBitfield = BitField<usize, u32, { ThinOwnerBitfield::NEXT_BIT }, 12, false>;
/// Fat lock payload: the monitor's heap address shifted right by the tag
/// width. Monitors are at least word aligned, so no address bits are lost.
pub type MonitorAddressBitfield = BitField<usize, usize, { TagBitfield::NEXT_BIT }, 62, false>;

/// State of an object's lock word.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LockState {
    /// No thread holds the lock.
    Unlocked,
    /// Held by a single thread, owner id and recursion count packed inline.
    ThinLocked,
    /// Inflated; all lock state lives in the pointed-to monitor.
    FatLocked,
}

/// Per-object lock state packed into a single machine word so the whole
/// value can be compared-and-swapped atomically.
///
/// Unlocked is the all-zero word. Thin and unlocked words share the zero
/// tag and are told apart by the owner field, which is never zero for a
/// held lock. The thin-to-fat transition is one-way for the lifetime of
/// the object.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct LockWord(usize);

impl LockWord {
    /// Maximum recursion count a thin lock can carry; acquiring while the
    /// count is saturated forces inflation rather than wrapping.
    pub const THIN_LOCK_MAX_COUNT: u32 = (1 << 12) - 1;

    /// Largest thread id encodable in the thin owner field.
    pub const MAX_THIN_LOCK_OWNER: u32 = (1 << 16) - 1;

    pub const fn unlocked() -> Self {
        Self(0)
    }

    pub fn from_thin_lock(owner: ThreadId, count: u32) -> Self {
        debug_assert!(owner != 0, "thread id zero is reserved");
        debug_assert!(owner <= Self::MAX_THIN_LOCK_OWNER);
        debug_assert!(count <= Self::THIN_LOCK_MAX_COUNT);
        let word = TagBitfield::update(LockTag::ThinOrUnlocked, 0);
        let word = ThinOwnerBitfield::update(owner, word);
        let word = ThinCountBitfield::update(count, word);
        Self(word)
    }

    pub fn from_monitor(address: usize) -> Self {
        debug_assert_eq!(address & ((1 << TagBitfield::NEXT_BIT) - 1), 0);
        let word = TagBitfield::update(LockTag::Fat, 0);
        let word = MonitorAddressBitfield::update(address >> TagBitfield::NEXT_BIT, word);
        Self(word)
    }

    pub fn state(&self) -> LockState {
        match TagBitfield::decode(self.0) {
            LockTag::Fat => LockState::FatLocked,
            LockTag::ThinOrUnlocked => {
                if self.0 == 0 {
                    LockState::Unlocked
                } else {
                    LockState::ThinLocked
                }
            }
        }
    }

    pub fn thin_lock_owner(&self) -> ThreadId {
        debug_assert_eq!(self.state(), LockState::ThinLocked);
        ThinOwnerBitfield::decode(self.0)
    }

    pub fn thin_lock_count(&self) -> u32 {
        debug_assert_eq!(self.state(), LockState::ThinLocked);
        ThinCountBitfield::decode(self.0)
    }

    pub fn monitor_address(&self) -> usize {
        debug_assert_eq!(self.state(), LockState::FatLocked);
        MonitorAddressBitfield::decode(self.0) << TagBitfield::NEXT_BIT
    }

    pub const fn raw(&self) -> usize {
        self.0
    }

    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
}

impl std::fmt::Debug for LockWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state() {
            LockState::Unlocked => write!(f, "LockWord::Unlocked"),
            LockState::ThinLocked => write!(
                f,
                "LockWord::ThinLocked(owner={}, count={})",
                self.thin_lock_owner(),
                self.thin_lock_count()
            ),
            LockState::FatLocked => {
                write!(f, "LockWord::FatLocked({:#x})", self.monitor_address())
            }
        }
    }
}
