//! IMAP command handlers for the fake server, one module per command.

mod login;
mod select;
mod store;

pub use expunge::handle_expunge;
pub use fetch::{FetchItems, handle_fetch};
pub use login::{handle_login, login_args};
pub use logout::handle_logout;
pub use select::handle_select;
pub use store::{StoreArgs, handle_store};

use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};

/// Expand a sequence set into message numbers. `*` stands for `max`.
pub fn expand_sequence_set(seq_set: &SequenceSet, max: u32) -> Vec<u32> {
    let value = |v: &SeqOrUid| match v {
        SeqOrUid::Value(v) => v.get(),
        SeqOrUid::Asterisk => max,
    };
    let mut numbers = Vec::new();
    for seq in seq_set.0.as_ref() {
        match seq {
            Sequence::Single(v) => numbers.push(value(v)),
            Sequence::Range(a, b) => {
                let (lo, hi) = (value(a).min(value(b)), value(a).max(value(b)));
                numbers.extend(lo..=hi);
            }
        }
    }
    numbers
}

#[cfg(test)]
pub mod test_support {
    use imap_codec::imap_types::sequence::{SeqOrUid, Sequence, SequenceSet};
    use std::num::NonZeroU32;

    pub fn single(n: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(NonZeroU32::new(n).unwrap()))]
                .try_into()
                .unwrap(),
        )
    }

    pub fn range(lo: u32, hi: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Range(
                SeqOrUid::Value(NonZeroU32::new(lo).unwrap()),
                SeqOrUid::Value(NonZeroU32::new(hi).unwrap()),
            )]
            .try_into()
            .unwrap(),
        )
    }
}
