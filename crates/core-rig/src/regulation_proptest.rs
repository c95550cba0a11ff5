#[cfg(test)]
mod proptest_regulation {
    use crate::drilling::{next_speed, torque_nm, DrillConfig};
    use crate::melting::{heater_action, MeltConfig};
    use crate::stepper::step_delay_micros;
    use proptest::prelude::*;

    fn drill_config() -> DrillConfig {
        DrillConfig::default()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(10000))]

        // Property: speed percent never leaves [speed_min, speed_max]
        // under any torque sequence, starting from any in-band speed.
        #[test]
        fn speed_stays_in_band(
            start in 5.0f64..=50.0,
            torques in proptest::collection::vec(0.0f64..100.0, 1..64),
        ) {
            let config = drill_config();
            let mut speed = start;
            for torque in torques {
                speed = next_speed(speed, torque, &config);
                prop_assert!(speed >= config.speed_min_percent);
                prop_assert!(speed <= config.speed_max_percent);
            }
        }

        // Property: sustained low torque is monotonically non-decreasing
        // until saturation at speed_max; symmetric for high torque.
        #[test]
        fn sustained_low_torque_ramps_up(
            start in 5.0f64..=50.0,
            torque in 0.0f64..8.0,
            steps in 1usize..32,
        ) {
            let config = drill_config();
            let mut speed = start;
            for _ in 0..steps {
                let before = speed;
                speed = next_speed(speed, torque, &config);
                prop_assert!(speed >= before);
            }
            if steps >= 9 {
                prop_assert_eq!(speed, config.speed_max_percent);
            }
        }

        #[test]
        fn sustained_high_torque_ramps_down(
            start in 5.0f64..=50.0,
            torque in 10.01f64..1000.0,
            steps in 1usize..32,
        ) {
            let config = drill_config();
            let mut speed = start;
            for _ in 0..steps {
                let before = speed;
                speed = next_speed(speed, torque, &config);
                prop_assert!(speed <= before);
            }
            if steps >= 9 {
                prop_assert_eq!(speed, config.speed_min_percent);
            }
        }

        // Property: in-band torque holds the speed exactly.
        #[test]
        fn in_band_torque_holds(
            speed in 5.0f64..=50.0,
            torque in 8.0f64..=10.0,
        ) {
            let config = drill_config();
            prop_assert_eq!(next_speed(speed, torque, &config), speed);
        }

        // Property: the inter-step delay is strictly positive for any
        // valid speed and resolution.
        #[test]
        fn step_delay_strictly_positive(
            rpm in 0.001f64..100_000.0,
            steps_per_revolution in 1u32..100_000,
        ) {
            prop_assert!(step_delay_micros(rpm, steps_per_revolution) >= 1);
        }

        // Property: torque is only defined for a turning shaft, and is
        // finite whenever defined with finite inputs.
        #[test]
        fn torque_defined_only_when_turning(
            voltage in 0.0f64..200.0,
            current in 0.0f64..20.0,
            rpm in -100.0f64..1000.0,
        ) {
            match torque_nm(voltage, current, rpm) {
                Some(t) => {
                    prop_assert!(rpm > 0.0);
                    prop_assert!(t.is_finite());
                }
                None => prop_assert!(rpm <= 0.0),
            }
        }

        // Property: the heater decision is ON strictly below the band,
        // OFF strictly above it, and a hold inside it.
        #[test]
        fn heater_decision_matches_band(temp in -50.0f64..300.0) {
            let config = MeltConfig::default();
            let action = heater_action(temp, &config);
            if temp < config.temp_min_c {
                prop_assert_eq!(action, Some(rig_io::RelayState::On));
            } else if temp > config.temp_max_c {
                prop_assert_eq!(action, Some(rig_io::RelayState::Off));
            } else {
                prop_assert_eq!(action, None);
            }
        }
    }
}
