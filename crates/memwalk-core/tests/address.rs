//! Tests for addresses and error reporting

use memwalk_core::error::WalkError;
use memwalk_core::types::Address;

#[test]
fn test_address_parse_hex_and_decimal()
{
    assert_eq!(Address::parse("0x1000").unwrap(), Address::new(0x1000));
    assert_eq!(Address::parse("0XfFfF").unwrap(), Address::new(0xffff));
    assert_eq!(Address::parse("4096").unwrap(), Address::new(4096));
    assert_eq!(Address::parse(" 0xffff_ff80_0000_0000 ").unwrap(), Address::new(0xffff_ff80_0000_0000));
}

#[test]
fn test_address_parse_rejects_garbage()
{
    for text in ["", "0x", "zz", "0x1g", "-1"] {
        match Address::parse(text) {
            Err(WalkError::InvalidArgument(message)) => assert!(message.contains("invalid address")),
            other => panic!("expected InvalidArgument for {text:?}, got {other:?}"),
        }
    }
}

#[test]
fn test_address_display_is_zero_padded_hex()
{
    assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
    assert_eq!(format!("{:x}", Address::new(0xbeef)), "beef");
}

#[test]
fn test_address_arithmetic()
{
    let addr = Address::new(0x1000);
    assert_eq!(addr + 0x10, Address::new(0x1010));
    assert_eq!(addr - 0x10, Address::new(0x0ff0));
    assert_eq!(addr.checked_sub(0x2000), None);
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    assert_eq!(Address::new(u64::MAX).saturating_add(1), Address::new(u64::MAX));
    assert!(Address::ZERO.is_null());
    assert!(!addr.is_null());
}

#[test]
fn test_error_reports_failing_address()
{
    let unmapped = WalkError::UnmappedMemory {
        address: Address::new(0xdead_0000),
        len: 8,
    };
    assert_eq!(unmapped.address(), Some(Address::new(0xdead_0000)));
    assert!(unmapped.to_string().contains("0x00000000dead0000"));

    let malformed = WalkError::MalformedStructure {
        address: Address::new(0x2000),
        reason: "cycle".to_string(),
    };
    assert_eq!(malformed.address(), Some(Address::new(0x2000)));
    assert!(malformed.to_string().contains("cycle"));

    assert_eq!(WalkError::UnknownType("skmem_cache".to_string()).address(), None);
}

#[test]
fn test_error_messages_name_the_layout()
{
    let error = WalkError::UnknownField {
        type_name: "skmem_slab".to_string(),
        field: "sl_bogus".to_string(),
    };
    let message = error.to_string();
    assert!(message.contains("skmem_slab"));
    assert!(message.contains("sl_bogus"));
}

#[test]
fn test_io_error_conversion()
{
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such core");
    let error: WalkError = io.into();
    assert!(matches!(error, WalkError::Io(_)));
    assert!(error.to_string().contains("no such core"));
}
