//! Turn instruction vocabulary.
//!
//! An instruction is the pair of a turn type and a direction modifier,
//! packed into one byte in the annotations artifact (type in the low five
//! bits, modifier in the high three).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TurnType {
    Invalid = 0,
    NewName,
    Continue,
    Turn,
    Merge,
    OnRamp,
    OffRamp,
    Fork,
    EndOfRoad,
    Notification,
    EnterRoundabout,
    EnterAndExitRoundabout,
    EnterRotary,
    EnterAndExitRotary,
    EnterRoundaboutIntersection,
    EnterAndExitRoundaboutIntersection,
    EnterRoundaboutAtExit,
    EnterRotaryAtExit,
    EnterRoundaboutIntersectionAtExit,
    ExitRoundabout,
    ExitRotary,
    ExitRoundaboutIntersection,
    StayOnRoundabout,
    Sliproad,
    Suppressed,
    NoTurn,
    UseLane,
}

impl TurnType {
    pub fn from_u8(v: u8) -> TurnType {
        use TurnType::*;
        match v {
            1 => NewName,
            2 => Continue,
            3 => Turn,
            4 => Merge,
            5 => OnRamp,
            6 => OffRamp,
            7 => Fork,
            8 => EndOfRoad,
            9 => Notification,
            10 => EnterRoundabout,
            11 => EnterAndExitRoundabout,
            12 => EnterRotary,
            13 => EnterAndExitRotary,
            14 => EnterRoundaboutIntersection,
            15 => EnterAndExitRoundaboutIntersection,
            16 => EnterRoundaboutAtExit,
            17 => EnterRotaryAtExit,
            18 => EnterRoundaboutIntersectionAtExit,
            19 => ExitRoundabout,
            20 => ExitRotary,
            21 => ExitRoundaboutIntersection,
            22 => StayOnRoundabout,
            23 => Sliproad,
            24 => Suppressed,
            25 => NoTurn,
            26 => UseLane,
            _ => Invalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DirectionModifier {
    UTurn = 0,
    SharpRight,
    Right,
    SlightRight,
    Straight,
    SlightLeft,
    Left,
    SharpLeft,
}

impl DirectionModifier {
    pub fn from_u8(v: u8) -> DirectionModifier {
        use DirectionModifier::*;
        match v & 0x7 {
            0 => UTurn,
            1 => SharpRight,
            2 => Right,
            3 => SlightRight,
            4 => Straight,
            5 => SlightLeft,
            6 => Left,
            _ => SharpLeft,
        }
    }

    /// Mirror a modifier across the straight axis (left <-> right).
    pub fn mirror(self) -> DirectionModifier {
        use DirectionModifier::*;
        match self {
            UTurn => UTurn,
            SharpRight => SharpLeft,
            Right => Left,
            SlightRight => SlightLeft,
            Straight => Straight,
            SlightLeft => SlightRight,
            Left => Right,
            SharpLeft => SharpRight,
        }
    }
}

/// Map a turn-circle angle (180 = straight, < 180 = rightward) to a
/// direction modifier.
pub fn angle_to_modifier(angle: f64) -> DirectionModifier {
    use DirectionModifier::*;
    let angle = angle.rem_euclid(360.0);
    if angle < 23.0 || angle > 337.0 {
        UTurn
    } else if angle < 67.0 {
        SharpRight
    } else if angle < 113.0 {
        Right
    } else if angle < 157.0 {
        SlightRight
    } else if angle < 203.0 {
        Straight
    } else if angle < 248.0 {
        SlightLeft
    } else if angle < 292.0 {
        Left
    } else {
        SharpLeft
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInstruction {
    #[serde(rename = "type")]
    pub turn_type: TurnType,
    pub modifier: DirectionModifier,
}

pub const NO_TURN: TurnInstruction = TurnInstruction {
    turn_type: TurnType::NoTurn,
    modifier: DirectionModifier::UTurn,
};

impl TurnInstruction {
    pub fn new(turn_type: TurnType, modifier: DirectionModifier) -> Self {
        Self {
            turn_type,
            modifier,
        }
    }

    pub fn pack(self) -> u8 {
        (self.turn_type as u8) | ((self.modifier as u8) << 5)
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            turn_type: TurnType::from_u8(byte & 0x1f),
            modifier: DirectionModifier::from_u8(byte >> 5),
        }
    }

    pub fn enters_roundabout(self) -> bool {
        use TurnType::*;
        matches!(
            self.turn_type,
            EnterRoundabout
                | EnterAndExitRoundabout
                | EnterRotary
                | EnterAndExitRotary
                | EnterRoundaboutIntersection
                | EnterAndExitRoundaboutIntersection
                | EnterRoundaboutAtExit
                | EnterRotaryAtExit
                | EnterRoundaboutIntersectionAtExit
        )
    }

    pub fn leaves_roundabout(self) -> bool {
        use TurnType::*;
        matches!(
            self.turn_type,
            EnterAndExitRoundabout
                | EnterAndExitRotary
                | EnterAndExitRoundaboutIntersection
                | ExitRoundabout
                | ExitRotary
                | ExitRoundaboutIntersection
        )
    }

    pub fn stays_on_roundabout(self) -> bool {
        self.turn_type == TurnType::StayOnRoundabout
    }

    /// Silent instructions never reach the emitted step list.
    pub fn is_silent(self) -> bool {
        matches!(
            self.turn_type,
            TurnType::NoTurn | TurnType::Suppressed | TurnType::StayOnRoundabout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_is_identity() {
        for type_byte in 0..27u8 {
            for modifier_byte in 0..8u8 {
                let instruction = TurnInstruction {
                    turn_type: TurnType::from_u8(type_byte),
                    modifier: DirectionModifier::from_u8(modifier_byte),
                };
                assert_eq!(TurnInstruction::unpack(instruction.pack()), instruction);
            }
        }
    }

    #[test]
    fn roundabout_predicates() {
        let enter = TurnInstruction::new(TurnType::EnterRotaryAtExit, DirectionModifier::Straight);
        assert!(enter.enters_roundabout());
        assert!(!enter.leaves_roundabout());

        let both =
            TurnInstruction::new(TurnType::EnterAndExitRoundabout, DirectionModifier::Right);
        assert!(both.enters_roundabout());
        assert!(both.leaves_roundabout());

        let exit = TurnInstruction::new(TurnType::ExitRoundabout, DirectionModifier::Right);
        assert!(!exit.enters_roundabout());
        assert!(exit.leaves_roundabout());
    }

    #[test]
    fn angles_map_to_modifiers() {
        assert_eq!(angle_to_modifier(180.0), DirectionModifier::Straight);
        assert_eq!(angle_to_modifier(90.0), DirectionModifier::Right);
        assert_eq!(angle_to_modifier(270.0), DirectionModifier::Left);
        assert_eq!(angle_to_modifier(5.0), DirectionModifier::UTurn);
    }

    #[test]
    fn mirror_swaps_sides() {
        assert_eq!(
            DirectionModifier::SlightLeft.mirror(),
            DirectionModifier::SlightRight
        );
        assert_eq!(DirectionModifier::Straight.mirror(), DirectionModifier::Straight);
    }
}
