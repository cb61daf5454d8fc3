// ag-core/src/units.rs

use uom::si::f64::{
    Energy as UomEnergy, Length as UomLength, Mass as UomMass, Pressure as UomPressure,
    Time as UomTime, Velocity as UomVelocity, Volume as UomVolume,
};

// Public canonical unit types (SI, f64)
pub type Energy = UomEnergy;
pub type Length = UomLength;
pub type Mass = UomMass;
pub type Pressure = UomPressure;
pub type Time = UomTime;
pub type Velocity = UomVelocity;
pub type Volume = UomVolume;

#[inline]
pub fn pa(v: f64) -> Pressure {
    use uom::si::pressure::pascal;
    Pressure::new::<pascal>(v)
}

#[inline]
pub fn m(v: f64) -> Length {
    use uom::si::length::meter;
    Length::new::<meter>(v)
}

#[inline]
pub fn m3(v: f64) -> Volume {
    use uom::si::volume::cubic_meter;
    Volume::new::<cubic_meter>(v)
}

#[inline]
pub fn kg(v: f64) -> Mass {
    use uom::si::mass::kilogram;
    Mass::new::<kilogram>(v)
}

#[inline]
pub fn s(v: f64) -> Time {
    use uom::si::time::second;
    Time::new::<second>(v)
}

#[inline]
pub fn mps(v: f64) -> Velocity {
    use uom::si::velocity::meter_per_second;
    Velocity::new::<meter_per_second>(v)
}

#[inline]
pub fn joules(v: f64) -> Energy {
    use uom::si::energy::joule;
    Energy::new::<joule>(v)
}

pub mod constants {
    /// Standard sea-level atmosphere (Pa, absolute).
    pub const STANDARD_ATMOSPHERE_PA: f64 = 101_325.0;
    /// Specific gas constant of dry air (J/(kg·K)).
    pub const R_AIR: f64 = 287.05;
    /// Heat capacity ratio of dry air.
    pub const GAMMA_AIR: f64 = 1.4;
    /// 20 °C in kelvin.
    pub const ROOM_TEMPERATURE_K: f64 = 293.15;
}

/// Conversions from canonical SI values into the units airgunners read.
///
/// Only callers that format output need these; the simulation core stays in SI.
pub mod display {
    use super::*;

    pub fn bar(p_pa: f64) -> f64 {
        use uom::si::pressure::bar;
        pa(p_pa).get::<bar>()
    }

    pub fn psi(p_pa: f64) -> f64 {
        use uom::si::pressure::pound_force_per_square_inch;
        pa(p_pa).get::<pound_force_per_square_inch>()
    }

    pub fn mm(len_m: f64) -> f64 {
        use uom::si::length::millimeter;
        m(len_m).get::<millimeter>()
    }

    pub fn fps(v_mps: f64) -> f64 {
        use uom::si::velocity::foot_per_second;
        mps(v_mps).get::<foot_per_second>()
    }

    pub fn ml(v_m3: f64) -> f64 {
        use uom::si::volume::milliliter;
        m3(v_m3).get::<milliliter>()
    }

    pub fn ms(t_s: f64) -> f64 {
        use uom::si::time::millisecond;
        s(t_s).get::<millisecond>()
    }

    pub fn grams(mass_kg: f64) -> f64 {
        use uom::si::mass::gram;
        kg(mass_kg).get::<gram>()
    }

    pub fn foot_pounds(e_j: f64) -> f64 {
        use uom::si::energy::foot_pound;
        joules(e_j).get::<foot_pound>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_smoke() {
        let _p = pa(101_325.0);
        let _l = m(2.0);
        let _v = m3(1e-5);
        let _m = kg(0.0012);
        let _dt = s(0.1);
        let _u = mps(90.0);
        let _e = joules(4.0);
    }

    #[test]
    fn display_conversions() {
        assert!((display::bar(101_325.0) - 1.013_25).abs() < 1e-9);
        assert!((display::mm(0.0254) - 25.4).abs() < 1e-9);
        assert!((display::fps(1.0) - 3.280_839_895).abs() < 1e-6);
        assert!((display::ml(1.74e-5) - 17.4).abs() < 1e-9);
        assert!((display::ms(0.02) - 20.0).abs() < 1e-9);
        assert!((display::grams(0.0012) - 1.2).abs() < 1e-9);
        assert!((display::psi(constants::STANDARD_ATMOSPHERE_PA) - 14.696).abs() < 1e-3);
    }
}
