//! 呼叫（`Call`）数据模型。
//!
//! 一个 `Call` 最多携带两条呼叫腿：`initial`（受理入站信令时创建，生命周期内
//! 始终存在）与 `remote`（桥接决定后才创建，一旦写入不再替换）。

use crate::leg::Leg;

/// 呼叫腿在其所属 `Call` 中的位置。
///
/// 不直接持有对端引用——"另一条腿"始终通过 [`Call::other`] 向呼叫本身查询，
/// 这样任何一条腿被销毁时都不会留下悬空引用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegPosition {
    /// 受理入站信令时创建的一侧。
    Initial,
    /// 桥接决定后创建的对端一侧。
    Remote,
}

impl LegPosition {
    /// 返回呼叫中的另一个位置。
    pub fn other(self) -> LegPosition {
        match self {
            LegPosition::Initial => LegPosition::Remote,
            LegPosition::Remote => LegPosition::Initial,
        }
    }
}

/// 一通桥接中的呼叫。
#[derive(Debug)]
pub struct Call {
    /// 在注册表内终身唯一的数字 id。
    pub id: u64,
    /// 入站一侧的呼叫腿，从创建到销毁始终存在。
    pub initial: Leg,
    /// 出站一侧的呼叫腿，桥接决定后才创建，一经写入不再替换。
    pub remote: Option<Leg>,
    /// 路由决策时计算出的主叫标识，截断至 32 字节。
    pub source: String,
    /// 路由决策时计算出的被叫标识，截断至 32 字节。
    pub dest: String,
}

impl Call {
    /// 创建一个只有 `initial` 腿的新呼叫。
    pub fn new(id: u64, initial: Leg, source: String, dest: String) -> Self {
        Call {
            id,
            initial,
            remote: None,
            source,
            dest,
        }
    }

    /// 按位置借出呼叫腿。
    pub fn leg(&self, position: LegPosition) -> Option<&Leg> {
        match position {
            LegPosition::Initial => Some(&self.initial),
            LegPosition::Remote => self.remote.as_ref(),
        }
    }

    /// 按位置借出可变呼叫腿。
    pub fn leg_mut(&mut self, position: LegPosition) -> Option<&mut Leg> {
        match position {
            LegPosition::Initial => Some(&mut self.initial),
            LegPosition::Remote => self.remote.as_mut(),
        }
    }

    /// 查询给定位置的"对端"呼叫腿——从不缓存，每次都向 `Call` 本身询问。
    pub fn other(&self, position: LegPosition) -> Option<&Leg> {
        self.leg(position.other())
    }

    /// 可变地借出给定位置的"对端"呼叫腿。
    pub fn other_mut(&mut self, position: LegPosition) -> Option<&mut Leg> {
        self.leg_mut(position.other())
    }

    /// 呼叫是否至少有一条 MNCC 呼叫腿（用于断线级联释放，§4.1/§4.8）。
    pub fn has_mncc_leg(&self) -> bool {
        self.initial.is_mncc() || self.remote.as_ref().is_some_and(Leg::is_mncc)
    }

    /// 两条腿是否均已销毁（通过外部标记判断，呼叫本身在两腿释放后即被注册表移除）。
    pub fn both_legs_releasing(&self) -> bool {
        self.initial.common().in_release
            && self.remote.as_ref().is_none_or(|leg| leg.common().in_release)
    }

    /// 两条腿（存在的话）是否都已被各自的适配器标记为销毁（§3：呼叫只有在
    /// 两腿都释放后才被移除）。尚未建立 `remote` 的呼叫视其为"已销毁"，
    /// 因为还没有第二条腿需要等待。
    pub fn fully_destroyed(&self) -> bool {
        self.initial.common().destroyed
            && self.remote.as_ref().is_none_or(|leg| leg.common().destroyed)
    }
}

/// 截断标识符至原始 C 实现的字段宽度（`%.32s`/`%.16s`），见 SPEC_FULL §3。
pub fn truncate_identifier(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_identifier_keeps_short_strings() {
        assert_eq!(truncate_identifier("101", 32), "101");
    }

    #[test]
    fn truncate_identifier_cuts_long_strings() {
        let long = "1".repeat(40);
        assert_eq!(truncate_identifier(&long, 32).len(), 32);
    }

    #[test]
    fn leg_position_other_is_involutive() {
        assert_eq!(LegPosition::Initial.other(), LegPosition::Remote);
        assert_eq!(LegPosition::Remote.other(), LegPosition::Initial);
    }
}
