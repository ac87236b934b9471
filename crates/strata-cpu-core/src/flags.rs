use crate::state::RFlags;
use crate::width::Width;

/// ZF, SF and PF depend only on the truncated result.
fn set_result_flags(rflags: &mut RFlags, result: u64, width: Width) {
    rflags.set(RFlags::ZF, result == 0);
    rflags.set(RFlags::SF, result & width.sign_bit() != 0);
    rflags.set(RFlags::PF, (result as u8).count_ones() % 2 == 0);
}

/// `dest + src` at `width`, writing all arithmetic flags.
pub fn add_with_flags(rflags: &mut RFlags, dest: u64, src: u64, width: Width) -> u64 {
    let (dest, src) = (dest & width.mask(), src & width.mask());
    let result = dest.wrapping_add(src) & width.mask();

    rflags.set(RFlags::CF, result < dest);
    rflags.set(
        RFlags::OF,
        (dest ^ result) & (src ^ result) & width.sign_bit() != 0,
    );
    rflags.set(RFlags::AF, (dest ^ src ^ result) & 0x10 != 0);
    set_result_flags(rflags, result, width);
    result
}

/// `dest - src` at `width`, writing all arithmetic flags.
pub fn sub_with_flags(rflags: &mut RFlags, dest: u64, src: u64, width: Width) -> u64 {
    let (dest, src) = (dest & width.mask(), src & width.mask());
    let result = dest.wrapping_sub(src) & width.mask();

    rflags.set(RFlags::CF, dest < src);
    rflags.set(
        RFlags::OF,
        (dest ^ src) & (dest ^ result) & width.sign_bit() != 0,
    );
    rflags.set(RFlags::AF, (dest ^ src ^ result) & 0x10 != 0);
    set_result_flags(rflags, result, width);
    result
}
