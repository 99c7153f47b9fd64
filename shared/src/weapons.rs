//! Weapon identifiers and the per-mode weapon pools.
//!
//! Weapon ids are assigned by the game client and carry gaps; unknown ids
//! can legitimately show up on the wire, so this is a newtype over the raw
//! byte rather than a closed enum.

/// A weapon id as it appears on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Weapon(pub u8);

impl Weapon {
    pub const EMPTY: Weapon = Weapon(0);
    pub const PISTOL: Weapon = Weapon(1);
    pub const AK47: Weapon = Weapon(2);
    pub const SWORD: Weapon = Weapon(3);
    pub const GRENADE_LAUNCHER: Weapon = Weapon(4);
    pub const BLINK_DAGGER: Weapon = Weapon(5);
    pub const SNIPER: Weapon = Weapon(6);
    pub const REVOLVER: Weapon = Weapon(7);
    pub const ICE_GUN: Weapon = Weapon(8);
    pub const SHIELD: Weapon = Weapon(9);
    pub const FAN: Weapon = Weapon(10);
    pub const MILITARY_SHOTGUN: Weapon = Weapon(11);
    pub const BALL: Weapon = Weapon(12);
    pub const THRUSTER: Weapon = Weapon(13);
    pub const BOW_AND_ARROW: Weapon = Weapon(14);
    pub const LASER: Weapon = Weapon(15);
    pub const LIGHTSABER: Weapon = Weapon(16);
    pub const UZI: Weapon = Weapon(17);
    pub const MINIGUN_MEDIUM_SILENCED: Weapon = Weapon(18);
    pub const MINIGUN_TINY: Weapon = Weapon(19);
    pub const MINIGUN: Weapon = Weapon(20);
    pub const BOUNCER: Weapon = Weapon(21);
    pub const TIME_BUBBLE: Weapon = Weapon(22);
    pub const RPG: Weapon = Weapon(23);
    pub const FLAME_THROWER: Weapon = Weapon(24);
    pub const SNAKE_PISTOL: Weapon = Weapon(25);
    pub const SNAKE_GRENADE_LAUNCHER: Weapon = Weapon(26);
    pub const SNAKE_LAUNCHER: Weapon = Weapon(27);
    pub const GLUE_GUN: Weapon = Weapon(28);
    pub const LASER_PLANTER: Weapon = Weapon(29);
    pub const HOLY_SWORD: Weapon = Weapon(30);
    pub const GOD_MINIGUN: Weapon = Weapon(31);
    pub const GOD_PISTOL: Weapon = Weapon(32);
    pub const M1: Weapon = Weapon(33);
    pub const SNAKE_MINIGUN: Weapon = Weapon(34);
    pub const LAVA_WHIP: Weapon = Weapon(35);
    pub const LAVA_STREAM: Weapon = Weapon(36);
    pub const LAVA_SPRAY: Weapon = Weapon(37);
    pub const SNAKE_SHOTGUN: Weapon = Weapon(38);
    pub const SPIKE_BALL: Weapon = Weapon(39);
    pub const LAVA_BEAM: Weapon = Weapon(40);
    pub const SPIKE_GUN: Weapon = Weapon(41);
    pub const BLACK_HOLE: Weapon = Weapon(42);
    pub const PUMPKIN_SHOOTER: Weapon = Weapon(60);
    pub const M16: Weapon = Weapon(61);
    pub const DEAGLE: Weapon = Weapon(62);
    pub const SAWED_OFF: Weapon = Weapon(63);
    pub const SPEAR: Weapon = Weapon(64);
    pub const FLYING_SNAKE_LAUNCHER: Weapon = Weapon(65);

    pub fn name(&self) -> &'static str {
        match *self {
            Weapon::EMPTY => "Empty",
            Weapon::PISTOL => "Pistol",
            Weapon::AK47 => "AK-47",
            Weapon::SWORD => "Sword",
            Weapon::GRENADE_LAUNCHER => "Grenade Launcher",
            Weapon::BLINK_DAGGER => "Blink Dagger",
            Weapon::SNIPER => "Sniper",
            Weapon::REVOLVER => "Revolver",
            Weapon::ICE_GUN => "Ice Gun",
            Weapon::SHIELD => "Shield",
            Weapon::FAN => "Fan",
            Weapon::MILITARY_SHOTGUN => "Military Shotgun",
            Weapon::BALL => "Ball",
            Weapon::THRUSTER => "Thruster",
            Weapon::BOW_AND_ARROW => "Bow And Arrow",
            Weapon::LASER => "Laser",
            Weapon::LIGHTSABER => "Lightsaber",
            Weapon::UZI => "Uzi",
            Weapon::MINIGUN_TINY => "Minigun Tiny",
            Weapon::MINIGUN => "Minigun",
            Weapon::BOUNCER => "Bouncer",
            Weapon::TIME_BUBBLE => "Time Bubble",
            Weapon::RPG => "RPG",
            Weapon::FLAME_THROWER => "Flame Thrower",
            Weapon::SNAKE_PISTOL => "Snake Pistol",
            Weapon::SNAKE_GRENADE_LAUNCHER => "Snake Grenade Launcher",
            Weapon::SNAKE_LAUNCHER => "Snake Launcher",
            Weapon::GLUE_GUN => "Glue Gun",
            Weapon::LASER_PLANTER => "Laser Planter",
            Weapon::HOLY_SWORD => "Holy Sword",
            Weapon::GOD_MINIGUN => "God Minigun",
            Weapon::GOD_PISTOL => "God Pistol",
            Weapon::M1 => "M1",
            Weapon::SNAKE_MINIGUN => "Snake Minigun",
            Weapon::LAVA_WHIP => "Lava Whip",
            Weapon::LAVA_STREAM => "Lava Stream",
            Weapon::LAVA_SPRAY => "Lava Spray",
            Weapon::SNAKE_SHOTGUN => "Snake Shotgun",
            Weapon::SPIKE_BALL => "Spike Ball",
            Weapon::LAVA_BEAM => "Lava Beam",
            Weapon::SPIKE_GUN => "Spike Gun",
            Weapon::BLACK_HOLE => "Black Hole",
            Weapon::PUMPKIN_SHOOTER => "Pumpkin Shooter",
            Weapon::M16 => "M16",
            Weapon::DEAGLE => "Deagle",
            Weapon::SAWED_OFF => "Sawed Off",
            Weapon::SPEAR => "Spear",
            Weapon::FLYING_SNAKE_LAUNCHER => "Flying Snake Launcher",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for Weapon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything that may drop in a stock match.
pub const STOCK_POOL: &[Weapon] = &[
    Weapon::PISTOL,
    Weapon::REVOLVER,
    Weapon::DEAGLE,
    Weapon::UZI,
    Weapon::GOD_PISTOL,
    Weapon::AK47,
    Weapon::M16,
    Weapon::M1,
    Weapon::SNIPER,
    Weapon::SAWED_OFF,
    Weapon::MILITARY_SHOTGUN,
    Weapon::BOUNCER,
    Weapon::GRENADE_LAUNCHER,
    Weapon::THRUSTER,
    Weapon::RPG,
    Weapon::SNAKE_PISTOL,
    Weapon::SNAKE_SHOTGUN,
    Weapon::SNAKE_GRENADE_LAUNCHER,
    Weapon::SNAKE_LAUNCHER,
    Weapon::SNAKE_MINIGUN,
    Weapon::FLYING_SNAKE_LAUNCHER,
    Weapon::SPIKE_BALL,
    Weapon::LAVA_BEAM,
    Weapon::LAVA_STREAM,
    Weapon::LAVA_SPRAY,
    Weapon::SPIKE_GUN,
    Weapon::SWORD,
    Weapon::BLINK_DAGGER,
    Weapon::SPEAR,
    Weapon::TIME_BUBBLE,
    Weapon::LASER,
    Weapon::ICE_GUN,
    Weapon::BLACK_HOLE,
    Weapon::GLUE_GUN,
    Weapon::MINIGUN,
    Weapon::FLAME_THROWER,
    Weapon::SHIELD,
    Weapon::FAN,
    Weapon::BALL,
    Weapon::LAVA_WHIP,
    Weapon::MINIGUN_TINY,
    Weapon::LASER_PLANTER,
    Weapon::HOLY_SWORD,
];

/// The reduced pool used under tournament rules.
pub const TOURNEY_POOL: &[Weapon] = &[
    Weapon::PISTOL,
    Weapon::REVOLVER,
    Weapon::DEAGLE,
    Weapon::M1,
    Weapon::SNIPER,
    Weapon::MILITARY_SHOTGUN,
    Weapon::GRENADE_LAUNCHER,
    Weapon::THRUSTER,
    Weapon::SNAKE_PISTOL,
    Weapon::SNAKE_LAUNCHER,
    Weapon::SWORD,
    Weapon::SPEAR,
    Weapon::ICE_GUN,
];

/// The pool used for two-player duels.
pub const DUEL_POOL: &[Weapon] = &[
    Weapon::PISTOL,
    Weapon::REVOLVER,
    Weapon::DEAGLE,
    Weapon::AK47,
    Weapon::M1,
    Weapon::SNIPER,
    Weapon::SAWED_OFF,
    Weapon::MILITARY_SHOTGUN,
    Weapon::GRENADE_LAUNCHER,
    Weapon::THRUSTER,
    Weapon::SNAKE_PISTOL,
    Weapon::SNAKE_SHOTGUN,
    Weapon::SNAKE_GRENADE_LAUNCHER,
    Weapon::SPIKE_BALL,
    Weapon::SPIKE_GUN,
    Weapon::SWORD,
    Weapon::SPEAR,
    Weapon::TIME_BUBBLE,
    Weapon::ICE_GUN,
];

/// The strict tier progression for gun game, climbed one kill at a time.
pub const GUN_GAME_PROGRESSION: &[Weapon] = &[
    Weapon::PISTOL,
    Weapon::REVOLVER,
    Weapon::SPIKE_GUN,
    Weapon::DEAGLE,
    Weapon::UZI,
    Weapon::ICE_GUN,
    Weapon::LAVA_SPRAY,
    Weapon::M1,
    Weapon::SNIPER,
    Weapon::BOUNCER,
    Weapon::LAVA_BEAM,
    Weapon::AK47,
    Weapon::M16,
    Weapon::MINIGUN,
    Weapon::LASER,
    Weapon::MILITARY_SHOTGUN,
    Weapon::SAWED_OFF,
    Weapon::GLUE_GUN,
    Weapon::TIME_BUBBLE,
    Weapon::PUMPKIN_SHOOTER,
    Weapon::FLAME_THROWER,
    Weapon::LAVA_STREAM,
    Weapon::THRUSTER,
    Weapon::GRENADE_LAUNCHER,
    Weapon::SPIKE_BALL,
    Weapon::RPG,
    Weapon::GOD_PISTOL,
    Weapon::SPEAR,
    Weapon::SWORD,
    Weapon::LIGHTSABER,
    Weapon::HOLY_SWORD,
    Weapon::BLINK_DAGGER,
    Weapon::BLACK_HOLE,
];
