quantity!(KorunaPerKilowattHour, "Kč/kWh", 2);
