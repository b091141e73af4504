use crate::util::constants::*;
use crate::util::Address;

/* Alignment */

pub fn is_address_aligned(addr: Address) -> bool {
    addr.is_aligned_to(BYTES_IN_ADDRESS)
}

pub fn page_align_down(address: Address) -> Address {
    address.align_down(BYTES_IN_PAGE)
}

pub fn is_page_aligned(address: Address) -> bool {
    address.is_aligned_to(BYTES_IN_PAGE)
}

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/* Conversion */

pub fn pages_to_bytes(pages: usize) -> usize {
    pages << LOG_BYTES_IN_PAGE
}

pub fn bytes_to_pages_up(bytes: usize) -> usize {
    (bytes + BYTES_IN_PAGE - 1) >> LOG_BYTES_IN_PAGE
}

/// Round `bytes` up to a whole number of words.
pub const fn bytes_to_words_up(bytes: usize) -> usize {
    (bytes + BYTES_IN_WORD - 1) >> LOG_BYTES_IN_WORD
}

#[cfg(test)]
mod tests {
    use crate::util::conversions::*;
    use crate::util::Address;

    #[test]
    fn test_page_align() {
        let addr = unsafe { Address::from_usize(0x123456789) };
        assert_eq!(page_align_down(addr), unsafe {
            Address::from_usize(0x123456000)
        });
        assert!(!is_page_aligned(addr));
        assert!(is_page_aligned(page_align_down(addr)));
    }

    #[test]
    fn test_pages() {
        assert_eq!(bytes_to_pages_up(1), 1);
        assert_eq!(bytes_to_pages_up(BYTES_IN_PAGE), 1);
        assert_eq!(bytes_to_pages_up(BYTES_IN_PAGE + 1), 2);
        assert_eq!(pages_to_bytes(3), 3 * BYTES_IN_PAGE);
    }

    #[test]
    fn test_words() {
        assert_eq!(bytes_to_words_up(0), 0);
        assert_eq!(bytes_to_words_up(1), 1);
        assert_eq!(bytes_to_words_up(BYTES_IN_WORD * 2), 2);
    }
}
