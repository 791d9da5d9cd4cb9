pub mod capture_worklet;
