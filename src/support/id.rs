//-
// Copyright (c) 2026, The Tmpbox Authors
//
// This file is part of Tmpbox.
//
// Tmpbox is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Tmpbox is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Tmpbox. If not, see <http://www.gnu.org/licenses/>.

use std::fmt::Write as _;

use rand::Rng;

/// Generates a random identifier in the canonical UUID version 4 layout.
pub fn random_id() -> String {
    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    // Version 4, RFC 4122 variant
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    let mut s = String::with_capacity(36);
    for (ix, b) in bytes.iter().enumerate() {
        if matches!(ix, 4 | 6 | 8 | 10) {
            s.push('-');
        }
        let _ = write!(s, "{:02x}", b);
    }
    s
}
