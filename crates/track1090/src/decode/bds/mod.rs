/*!
 * Comm-B Data Selector (BDS) registers and extended squitter payloads.
 *
 * The extended squitter payloads (0,5 / 0,6 / 0,8 / 0,9 / 6,1 / 6,2 / 6,5)
 * are parsed structurally from the ME field. The Comm-B registers
 * (1,0 / 1,7 / 2,0 / 3,0 / 4,0 / 4,4 / 5,0 / 6,0) arrive without any
 * indication of which register was requested, so each module also exposes a
 * `score` function used by the dispatcher in [`crate::decode::commb`].
 */

pub mod bds05;
pub mod bds06;
pub mod bds08;
pub mod bds09;
pub mod bds10;
pub mod bds17;
pub mod bds20;
pub mod bds30;
pub mod bds40;
pub mod bds44;
pub mod bds50;
pub mod bds60;
pub mod bds61;
pub mod bds62;
pub mod bds65;
