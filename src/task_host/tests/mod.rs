mod support;
mod startup;
mod scope;
mod stress_tests;
