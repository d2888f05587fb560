//! Elevation check. Change-journal operations require membership in the
//! Administrators group, so volume opens verify it up front for a clearer
//! error than the access-denied the FSCTL calls would produce later.

use windows::Win32::{
    Foundation::HANDLE,
    Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation},
    System::Threading::{GetCurrentProcess, OpenProcessToken},
};

pub(crate) fn is_elevated() -> windows::core::Result<bool> {
    let mut token: HANDLE = HANDLE::default();
    unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)? };

    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned_length = 0u32;
    unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut _ as *mut _),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned_length,
        )?
    };

    Ok(elevation.TokenIsElevated != 0)
}
