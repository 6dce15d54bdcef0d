use super::AccessType;

/// Page fault raised by a linear access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Faulting linear address (CR2).
    pub addr: u32,
    /// x86 #PF error code.
    pub error_code: u32,
}

impl PageFault {
    pub const EC_P: u32 = 1 << 0;
    pub const EC_WR: u32 = 1 << 1;
    pub const EC_US: u32 = 1 << 2;
    pub const EC_RSVD: u32 = 1 << 3;
    pub const EC_ID: u32 = 1 << 4;

    pub fn new(addr: u32, present: bool, write: bool, user: bool, rsvd: bool, instr: bool) -> Self {
        let bits = [
            (present, Self::EC_P),
            (write, Self::EC_WR),
            (user, Self::EC_US),
            (rsvd, Self::EC_RSVD),
            (instr, Self::EC_ID),
        ];
        let error_code = bits
            .iter()
            .filter(|(set, _)| *set)
            .fold(0, |code, (_, bit)| code | bit);
        Self { addr, error_code }
    }

    pub fn not_present(addr: u32, access: AccessType, cpl: u8) -> Self {
        Self::for_access(addr, access, cpl, false, false)
    }

    pub fn protection(addr: u32, access: AccessType, cpl: u8) -> Self {
        Self::for_access(addr, access, cpl, true, false)
    }

    pub fn rsvd(addr: u32, access: AccessType, cpl: u8) -> Self {
        Self::for_access(addr, access, cpl, true, true)
    }

    fn for_access(addr: u32, access: AccessType, cpl: u8, present: bool, rsvd: bool) -> Self {
        Self::new(
            addr,
            present,
            access == AccessType::Write,
            cpl == 3,
            rsvd,
            access == AccessType::Execute,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_present_error_code_bits() {
        let pf = PageFault::not_present(0x1234, AccessType::Read, 0);
        assert_eq!(pf.addr, 0x1234);
        assert_eq!(pf.error_code, 0);

        let pf = PageFault::not_present(0x1234, AccessType::Write, 3);
        assert_eq!(pf.error_code, PageFault::EC_WR | PageFault::EC_US);
    }

    #[test]
    fn protection_and_reserved_bits() {
        let pf = PageFault::protection(0x1234, AccessType::Execute, 3);
        assert_eq!(
            pf.error_code,
            PageFault::EC_P | PageFault::EC_US | PageFault::EC_ID
        );

        let pf = PageFault::rsvd(0x1234, AccessType::Write, 0);
        assert_eq!(
            pf.error_code,
            PageFault::EC_P | PageFault::EC_WR | PageFault::EC_RSVD
        );
    }
}
